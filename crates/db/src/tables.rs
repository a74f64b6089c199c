//! Table definitions for the redb backend.
//!
//! Named tables replace the prefix conventions of a single-namespace
//! store: `data` holds the mutable key/value bindings, `resources` maps
//! encoded hashes to immutable content. The backend's own roots and
//! freelist serve as the auxiliary root subspace.

use redb::TableDefinition;

/// Table definitions for the stowage database.
pub(crate) struct Tables;

impl Tables {
    /// Key/value bindings: key → value, both raw bytes.
    ///
    /// Keys are 1..=255 bytes; values up to 1 GiB. An unbound key is
    /// simply absent (writing an empty value removes the binding).
    pub const DATA: TableDefinition<'static, &'static [u8], &'static [u8]> =
        TableDefinition::new("data");

    /// Stowed resources: encoded hash (64 bytes) → content.
    pub const RESOURCES: TableDefinition<'static, &'static [u8], &'static [u8]> =
        TableDefinition::new("resources");
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::TableHandle;

    #[test]
    fn table_names_unique() {
        assert_ne!(Tables::DATA.name(), Tables::RESOURCES.name());
    }
}

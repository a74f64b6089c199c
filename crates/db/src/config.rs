//! Database configuration.

use std::time::Duration;

use serde::Deserialize;

/// Options accepted when opening a database.
///
/// The directory path is the `open` argument; everything else lives
/// here. Construct with struct-update syntax over [`DbConfig::default`]:
///
/// ```
/// use cairn_db::DbConfig;
///
/// let cfg = DbConfig {
///     max_size_mb: Some(4096),
///     ..DbConfig::default()
/// };
/// # let _ = cfg;
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Soft upper bound on the backing file size, in mebibytes.
    ///
    /// Checked before each committer batch; an oversized file fails the
    /// batch with a backend error rather than growing further.
    pub max_size_mb: Option<u64>,

    /// Memory budget for the LSM node cache layered above this database.
    pub cache_bytes: usize,

    /// Interval between background GC passes. `None` disables the GC
    /// thread; passes can still be driven explicitly.
    pub gc_interval: Option<Duration>,

    /// Maximum resources traced per GC pass. When the budget is
    /// exhausted the pass marks conservatively and skips deletion.
    pub gc_step_budget: usize,

    /// Maximum victims per sweep proposal sent to the committer.
    pub gc_sweep_batch: usize,

    /// Maximum proposals coalesced into one committer batch.
    pub max_batch: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            max_size_mb: None,
            cache_bytes: 32 * 1024 * 1024,
            gc_interval: Some(Duration::from_secs(30)),
            gc_step_budget: 10_000,
            gc_sweep_batch: 1_000,
            max_batch: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_background_gc() {
        let cfg = DbConfig::default();
        assert!(cfg.gc_interval.is_some());
        assert!(cfg.max_size_mb.is_none());
        assert!(cfg.max_batch > 0);
    }

    #[test]
    fn struct_update_overrides() {
        let cfg = DbConfig {
            max_size_mb: Some(64),
            gc_interval: None,
            ..DbConfig::default()
        };
        assert_eq!(cfg.max_size_mb, Some(64));
        assert_eq!(cfg.gc_interval, None);
        assert_eq!(cfg.max_batch, DbConfig::default().max_batch);
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: DbConfig = serde_json::from_str("{\"max_size_mb\": 128}").expect("parse");
        assert_eq!(cfg.max_size_mb, Some(128));
        assert_eq!(cfg.gc_step_budget, DbConfig::default().gc_step_budget);
    }
}

//! The value abstraction for tree payloads.

use cairn_types::CodecError;
use cairn_types::codec;

/// A value storable in the tree.
///
/// Implementations must be self-delimiting: `read` consumes exactly the
/// bytes `write` produced, with no external framing.
pub trait TrieValue: Clone {
    /// Append the encoded value.
    fn write(&self, out: &mut Vec<u8>);

    /// Decode a value from the front of `input`.
    fn read(input: &mut &[u8]) -> Result<Self, CodecError>;

    /// Encoded size, used by the compaction estimator.
    fn size_hint(&self) -> usize;
}

/// Raw bytes, encoded as a ByteString.
impl TrieValue for Vec<u8> {
    fn write(&self, out: &mut Vec<u8>) {
        codec::write_bytes(out, self);
    }

    fn read(input: &mut &[u8]) -> Result<Self, CodecError> {
        codec::read_bytes(input)
    }

    fn size_hint(&self) -> usize {
        codec::bytes_len(self)
    }
}

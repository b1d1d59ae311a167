use std::io::{Read, Write};

use bincode::{Decode, Encode};

use crate::error::Result;

/// Serialization for the fixed-layout on-disk records.
///
/// Records are encoded with bincode's legacy configuration: fixed-width
/// little-endian integers, no length prefix for arrays. Every record type
/// has a fixed upper bound on its encoded size so it fits the slot reserved
/// for it on disk.
pub trait DiskRecord: Encode + Decode<()> {
    /// serialize into a writer implementing [Write](std::io::Write)
    /// # Returns
    /// The number of bytes written if successful
    fn write_record<W>(&self, w: &mut W) -> Result<usize>
    where
        W: Write,
    {
        Ok(bincode::encode_into_std_write(self, w, bincode::config::legacy())?)
    }

    /// deserialize from a reader implementing [Read](std::io::Read)
    fn read_record<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        Ok(bincode::decode_from_std_read(r, bincode::config::legacy())?)
    }

    /// Decode a record from the front of `buf`.
    fn from_bytes(buf: &[u8]) -> Result<Self> {
        let (record, _) = bincode::decode_from_slice(buf, bincode::config::legacy())?;
        Ok(record)
    }

    /// Encode into the front of `buf`.
    /// # Returns
    /// The encoded length
    fn to_bytes(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(bincode::encode_into_slice(self, buf, bincode::config::legacy())?)
    }
}

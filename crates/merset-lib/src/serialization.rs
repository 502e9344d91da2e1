//! On-disk index format
//!
//! A merset index is a single file holding one sorted (k-mer, count)
//! multiset:
//!
//! ```text
//! IndexHeader
//!   ├─ magic: "MERSIDX1"
//!   ├─ version_major: u32
//!   ├─ version_minor: u32
//!   ├─ k: u32
//!   ├─ orientation: u8
//!   ├─ prefix_bits: u32
//!   ├─ counter_bits: u32
//!   ├─ distinct: u64   (patched in at finalize)
//!   └─ total: u64      (patched in at finalize)
//! Body:
//!   records in ascending key order, grouped by key prefix; each record
//!   is the key suffix then the count, both little-endian byte-padded
//! IndexTrailer:
//!   ├─ directory: [u64; 2^prefix_bits]  (records per bucket)
//!   ├─ hist_len: u64
//!   ├─ histogram: hist_len × (value: u64, distinct: u64)
//!   ├─ distinct: u64   (echo of the header)
//!   ├─ total: u64      (echo of the header)
//!   ├─ trailer_bytes: u64
//!   └─ end_magic: "MERSEND1"
//! ```
//!
//! The trailer is written last and echoes the totals, so its presence and
//! consistency mark the file complete; an interrupted writer leaves no
//! trailer and readers refuse the file. The final two fields let a reader
//! find the trailer from the end of the file without any forward scan.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::kmer::Orientation;
use crate::layout::BucketLayout;

/// Magic bytes opening every index file
pub const MAGIC: &[u8; 8] = b"MERSIDX1";

/// Magic bytes closing every complete index file
pub const END_MAGIC: &[u8; 8] = b"MERSEND1";

/// File format version: (major, minor)
/// Increment major on breaking changes, minor on compatible changes
pub const FORMAT_VERSION: (u32, u32) = (1, 0);

/// Serialized header size in bytes
pub const HEADER_BYTES: u64 = 8 + 4 + 4 + 4 + 1 + 4 + 4 + 8 + 8;

/// Byte offset of the patched (distinct, total) pair inside the header
pub const HEADER_TOTALS_OFFSET: u64 = HEADER_BYTES - 16;

/// Fixed bytes at the very end of a complete file:
/// distinct, total, trailer_bytes, end magic
const TRAILER_TAIL_BYTES: u64 = 8 + 8 + 8 + 8;

/// Malformed, foreign or incomplete index files
#[derive(Debug, Error)]
pub enum IndexFormatError {
    /// The file does not start with the index magic
    #[error("{}: not a merset index (bad magic)", path.display())]
    BadMagic {
        /// Offending file
        path: PathBuf,
    },

    /// The file uses a major version this build cannot read
    #[error(
        "{}: unsupported index version {found_major}.{found_minor} (supported: {}.x)",
        path.display(), FORMAT_VERSION.0
    )]
    UnsupportedVersion {
        /// Offending file
        path: PathBuf,
        /// Major version found
        found_major: u32,
        /// Minor version found
        found_minor: u32,
    },

    /// The completeness trailer is missing or disagrees with the header
    #[error("{}: incomplete index: {detail}", path.display())]
    Incomplete {
        /// Offending file
        path: PathBuf,
        /// What was missing or inconsistent
        detail: String,
    },

    /// The file ended inside a structure
    #[error("{}: truncated while reading {while_reading}", path.display())]
    Truncated {
        /// Offending file
        path: PathBuf,
        /// Structure being read
        while_reading: &'static str,
    },

    /// A structural invariant of the body does not hold
    #[error("{}: corrupt index: {detail}", path.display())]
    Corrupt {
        /// Offending file
        path: PathBuf,
        /// Violated invariant
        detail: String,
    },

    /// Keys are not strictly ascending
    #[error("{}: records out of order (key {key:#x} after {prev:#x})", path.display())]
    OutOfOrder {
        /// Offending file
        path: PathBuf,
        /// Previous key
        prev: u64,
        /// Offending key
        key: u64,
    },

    /// An I/O operation on the index failed
    #[error("{}: i/o failure", path.display())]
    Io {
        /// Offending file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl IndexFormatError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        IndexFormatError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Header of an index file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// K-mer size of every key in the file
    pub k: u32,
    /// Orientation the keys were counted under
    pub orientation: Orientation,
    /// High-order key bits grouping the body into buckets
    pub prefix_bits: u32,
    /// Bit width of a stored count; larger counts saturate to its maximum
    pub counter_bits: u32,
    /// Number of distinct keys in the body
    pub distinct: u64,
    /// Sum of all stored counts
    pub total: u64,
}

impl IndexHeader {
    /// Create a header with zeroed totals, to be patched at finalize
    pub fn new(k: u32, orientation: Orientation, prefix_bits: u32, counter_bits: u32) -> Self {
        Self {
            k,
            orientation,
            prefix_bits,
            counter_bits,
            distinct: 0,
            total: 0,
        }
    }

    /// The prefix/suffix split the body is grouped by
    pub fn layout(&self) -> BucketLayout {
        // header fields are validated before any header is written or
        // accepted, so this split is always in range
        BucketLayout::new(self.k, self.prefix_bits).expect("validated header layout")
    }

    /// Bytes one stored count occupies
    #[inline]
    pub fn counter_bytes(&self) -> usize {
        (self.counter_bits as usize).div_ceil(8)
    }

    /// Bytes one body record occupies
    #[inline]
    pub fn record_bytes(&self) -> usize {
        self.layout().suffix_bytes() + self.counter_bytes()
    }

    /// Largest count the configured counter width can store
    #[inline]
    pub fn max_count(&self) -> u64 {
        if self.counter_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.counter_bits) - 1
        }
    }

    /// Write the header, magic and version included
    pub fn write(&self, writer: &mut dyn Write) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.0.to_le_bytes())?;
        writer.write_all(&FORMAT_VERSION.1.to_le_bytes())?;
        writer.write_all(&self.k.to_le_bytes())?;
        writer.write_all(&[self.orientation.code()])?;
        writer.write_all(&self.prefix_bits.to_le_bytes())?;
        writer.write_all(&self.counter_bits.to_le_bytes())?;
        writer.write_all(&self.distinct.to_le_bytes())?;
        writer.write_all(&self.total.to_le_bytes())?;
        Ok(())
    }

    /// Read and validate a header
    ///
    /// # Errors
    /// Rejects foreign magic, unsupported major versions and fields no
    /// valid writer produces.
    pub fn read(reader: &mut dyn Read, path: &Path) -> Result<Self, IndexFormatError> {
        let mut magic = [0u8; 8];
        read_struct(reader, &mut magic, path, "header")?;
        if &magic != MAGIC {
            return Err(IndexFormatError::BadMagic {
                path: path.to_path_buf(),
            });
        }

        let mut version_major_bytes = [0u8; 4];
        let mut version_minor_bytes = [0u8; 4];
        let mut k_bytes = [0u8; 4];
        let mut orientation_byte = [0u8; 1];
        let mut prefix_bits_bytes = [0u8; 4];
        let mut counter_bits_bytes = [0u8; 4];
        let mut distinct_bytes = [0u8; 8];
        let mut total_bytes = [0u8; 8];

        read_struct(reader, &mut version_major_bytes, path, "header")?;
        read_struct(reader, &mut version_minor_bytes, path, "header")?;
        read_struct(reader, &mut k_bytes, path, "header")?;
        read_struct(reader, &mut orientation_byte, path, "header")?;
        read_struct(reader, &mut prefix_bits_bytes, path, "header")?;
        read_struct(reader, &mut counter_bits_bytes, path, "header")?;
        read_struct(reader, &mut distinct_bytes, path, "header")?;
        read_struct(reader, &mut total_bytes, path, "header")?;

        let version_major = u32::from_le_bytes(version_major_bytes);
        let version_minor = u32::from_le_bytes(version_minor_bytes);
        if version_major != FORMAT_VERSION.0 {
            return Err(IndexFormatError::UnsupportedVersion {
                path: path.to_path_buf(),
                found_major: version_major,
                found_minor: version_minor,
            });
        }

        let k = u32::from_le_bytes(k_bytes);
        let prefix_bits = u32::from_le_bytes(prefix_bits_bytes);
        let counter_bits = u32::from_le_bytes(counter_bits_bytes);

        let corrupt = |detail: String| IndexFormatError::Corrupt {
            path: path.to_path_buf(),
            detail,
        };
        if !crate::constants::is_valid_k(k) {
            return Err(corrupt(format!("header k={k} out of range")));
        }
        if prefix_bits > 2 * k {
            return Err(corrupt(format!(
                "header prefix_bits={prefix_bits} exceeds key width of k={k}"
            )));
        }
        if counter_bits == 0 || counter_bits > 64 {
            return Err(corrupt(format!(
                "header counter_bits={counter_bits} out of range"
            )));
        }
        let orientation = Orientation::from_code(orientation_byte[0])
            .ok_or_else(|| corrupt(format!("unknown orientation code {}", orientation_byte[0])))?;

        Ok(Self {
            k,
            orientation,
            prefix_bits,
            counter_bits,
            distinct: u64::from_le_bytes(distinct_bytes),
            total: u64::from_le_bytes(total_bytes),
        })
    }
}

/// Trailer of a complete index file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTrailer {
    /// Records per bucket, one entry per possible prefix
    pub directory: Vec<u64>,
    /// (count value, number of distinct keys carrying it), ascending by value
    pub histogram: Vec<(u64, u64)>,
    /// Echo of the header's distinct-key total
    pub distinct: u64,
    /// Echo of the header's count total
    pub total: u64,
}

impl IndexTrailer {
    /// Serialized size in bytes
    pub fn byte_size(&self) -> u64 {
        8 * self.directory.len() as u64 + 8 + 16 * self.histogram.len() as u64 + TRAILER_TAIL_BYTES
    }

    /// Write the trailer, end magic included
    pub fn write(&self, writer: &mut dyn Write) -> io::Result<()> {
        for &records in &self.directory {
            writer.write_all(&records.to_le_bytes())?;
        }
        writer.write_all(&(self.histogram.len() as u64).to_le_bytes())?;
        for &(value, distinct) in &self.histogram {
            writer.write_all(&value.to_le_bytes())?;
            writer.write_all(&distinct.to_le_bytes())?;
        }
        writer.write_all(&self.distinct.to_le_bytes())?;
        writer.write_all(&self.total.to_le_bytes())?;
        writer.write_all(&self.byte_size().to_le_bytes())?;
        writer.write_all(END_MAGIC)?;
        Ok(())
    }

    /// Locate and parse the trailer from a whole-file byte slice
    ///
    /// # Errors
    /// Any missing piece or internal disagreement reports the file as
    /// incomplete; a valid writer only produces the trailer in one atomic
    /// tail write after the body.
    pub fn parse(
        file_bytes: &[u8],
        bucket_count: u64,
        path: &Path,
    ) -> Result<Self, IndexFormatError> {
        let incomplete = |detail: String| IndexFormatError::Incomplete {
            path: path.to_path_buf(),
            detail,
        };

        let file_len = file_bytes.len() as u64;
        if file_len < HEADER_BYTES + TRAILER_TAIL_BYTES {
            return Err(incomplete("file too short for any trailer".to_string()));
        }
        if &file_bytes[(file_len - 8) as usize..] != END_MAGIC {
            return Err(incomplete("end magic missing".to_string()));
        }

        let tail = &file_bytes[(file_len - TRAILER_TAIL_BYTES) as usize..];
        let distinct = read_u64(&tail[0..8]);
        let total = read_u64(&tail[8..16]);
        let trailer_bytes = read_u64(&tail[16..24]);

        let expected_bytes =
            8 * bucket_count + 8 + TRAILER_TAIL_BYTES + 16 * hist_len_of(trailer_bytes, bucket_count);
        if trailer_bytes < 8 * bucket_count + 8 + TRAILER_TAIL_BYTES
            || trailer_bytes != expected_bytes
            || trailer_bytes > file_len - HEADER_BYTES
        {
            return Err(incomplete(format!(
                "trailer size field {trailer_bytes} does not fit the file"
            )));
        }

        let start = (file_len - trailer_bytes) as usize;
        let mut cursor = start;
        let mut next_u64 = |what: &'static str| -> Result<u64, IndexFormatError> {
            let end = cursor + 8;
            if end > file_bytes.len() {
                return Err(IndexFormatError::Truncated {
                    path: path.to_path_buf(),
                    while_reading: what,
                });
            }
            let value = read_u64(&file_bytes[cursor..end]);
            cursor = end;
            Ok(value)
        };

        let mut directory = Vec::with_capacity(bucket_count as usize);
        for _ in 0..bucket_count {
            directory.push(next_u64("bucket directory")?);
        }
        let hist_len = next_u64("histogram length")?;
        let mut histogram = Vec::with_capacity(hist_len as usize);
        let mut prev_value = None;
        for _ in 0..hist_len {
            let value = next_u64("histogram")?;
            let count = next_u64("histogram")?;
            if prev_value.is_some_and(|p| p >= value) {
                return Err(IndexFormatError::Corrupt {
                    path: path.to_path_buf(),
                    detail: "histogram values not strictly ascending".to_string(),
                });
            }
            prev_value = Some(value);
            histogram.push((value, count));
        }

        Ok(Self {
            directory,
            histogram,
            distinct,
            total,
        })
    }
}

/// Histogram entries implied by a trailer size field
fn hist_len_of(trailer_bytes: u64, bucket_count: u64) -> u64 {
    trailer_bytes
        .saturating_sub(8 * bucket_count + 8 + TRAILER_TAIL_BYTES)
        / 16
}

/// Build an index file path from a base path, appending the `.mset`
/// extension unless it is already there
pub fn index_file_path<P: AsRef<Path>>(base: P) -> PathBuf {
    let mut path = base.as_ref().to_path_buf();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    if ext == "mset" {
        path
    } else if ext.is_empty() {
        path.set_extension("mset");
        path
    } else {
        path.set_extension(format!("{ext}.mset"));
        path
    }
}

/// Write the low `bytes` bytes of a value, little-endian
#[inline]
pub(crate) fn write_uint_le<W: Write>(writer: &mut W, value: u64, bytes: usize) -> io::Result<()> {
    debug_assert!(bytes == 8 || value < (1u64 << (8 * bytes)));
    writer.write_all(&value.to_le_bytes()[..bytes])
}

/// Read a little-endian value of up to 8 bytes
#[inline]
pub(crate) fn read_uint_le(bytes: &[u8]) -> u64 {
    debug_assert!(bytes.len() <= 8);
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[inline]
fn read_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes(bytes.try_into().expect("8-byte slice"))
}

fn read_struct(
    reader: &mut dyn Read,
    buf: &mut [u8],
    path: &Path,
    what: &'static str,
) -> Result<(), IndexFormatError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            IndexFormatError::Truncated {
                path: path.to_path_buf(),
                while_reading: what,
            }
        } else {
            IndexFormatError::io(path, e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_path() -> PathBuf {
        PathBuf::from("test.mset")
    }

    #[test]
    fn test_header_roundtrip() {
        let mut header = IndexHeader::new(21, Orientation::Canonical, 6, 32);
        header.distinct = 123;
        header.total = 456;

        let mut buffer = Vec::new();
        header.write(&mut buffer).unwrap();
        assert_eq!(buffer.len() as u64, HEADER_BYTES);

        let header2 = IndexHeader::read(&mut buffer.as_slice(), &test_path()).unwrap();
        assert_eq!(header, header2);
        assert_eq!(header2.record_bytes(), 5 + 4); // 36-bit suffix, 32-bit count
        assert_eq!(header2.max_count(), u32::MAX as u64);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut buffer = Vec::new();
        IndexHeader::new(11, Orientation::Forward, 4, 16)
            .write(&mut buffer)
            .unwrap();
        buffer[0] = b'X';
        let err = IndexHeader::read(&mut buffer.as_slice(), &test_path()).unwrap_err();
        assert!(matches!(err, IndexFormatError::BadMagic { .. }));
    }

    #[test]
    fn test_header_rejects_future_major_version() {
        let mut buffer = Vec::new();
        IndexHeader::new(11, Orientation::Forward, 4, 16)
            .write(&mut buffer)
            .unwrap();
        buffer[8] = 99;
        let err = IndexHeader::read(&mut buffer.as_slice(), &test_path()).unwrap_err();
        assert!(matches!(
            err,
            IndexFormatError::UnsupportedVersion { found_major: 99, .. }
        ));
    }

    #[test]
    fn test_header_rejects_nonsense_fields() {
        let mut buffer = Vec::new();
        IndexHeader::new(11, Orientation::Forward, 4, 16)
            .write(&mut buffer)
            .unwrap();
        // orientation code 7 does not exist
        buffer[20] = 7;
        let err = IndexHeader::read(&mut buffer.as_slice(), &test_path()).unwrap_err();
        assert!(matches!(err, IndexFormatError::Corrupt { .. }));
    }

    #[test]
    fn test_header_truncated() {
        let mut buffer = Vec::new();
        IndexHeader::new(11, Orientation::Forward, 4, 16)
            .write(&mut buffer)
            .unwrap();
        buffer.truncate(20);
        let err = IndexHeader::read(&mut buffer.as_slice(), &test_path()).unwrap_err();
        assert!(matches!(err, IndexFormatError::Truncated { .. }));
    }

    #[test]
    fn test_trailer_roundtrip() {
        let header = IndexHeader::new(5, Orientation::Canonical, 2, 32);
        let trailer = IndexTrailer {
            directory: vec![3, 0, 1, 2],
            histogram: vec![(1, 4), (2, 1), (9, 1)],
            distinct: 6,
            total: 15,
        };

        let mut file = Vec::new();
        header.write(&mut file).unwrap();
        // fake body: 6 records of (1-byte suffix + 4-byte count)
        file.extend(std::iter::repeat(0u8).take(6 * header.record_bytes()));
        trailer.write(&mut file).unwrap();

        let parsed = IndexTrailer::parse(&file, 4, &test_path()).unwrap();
        assert_eq!(parsed, trailer);
    }

    #[test]
    fn test_trailer_missing_is_incomplete() {
        let header = IndexHeader::new(5, Orientation::Canonical, 2, 32);
        let mut file = Vec::new();
        header.write(&mut file).unwrap();
        file.extend_from_slice(&[0u8; 64]);

        let err = IndexTrailer::parse(&file, 4, &test_path()).unwrap_err();
        assert!(matches!(err, IndexFormatError::Incomplete { .. }));
    }

    #[test]
    fn test_trailer_detects_torn_write() {
        let header = IndexHeader::new(5, Orientation::Canonical, 2, 32);
        let trailer = IndexTrailer {
            directory: vec![1, 0, 0, 0],
            histogram: vec![(1, 1)],
            distinct: 1,
            total: 1,
        };
        let mut file = Vec::new();
        header.write(&mut file).unwrap();
        file.extend(std::iter::repeat(0u8).take(header.record_bytes()));
        trailer.write(&mut file).unwrap();
        // drop the last byte of the end magic
        file.pop();

        let err = IndexTrailer::parse(&file, 4, &test_path()).unwrap_err();
        assert!(matches!(err, IndexFormatError::Incomplete { .. }));
    }

    #[test]
    fn test_uint_le_roundtrip() {
        for (value, bytes) in [(0u64, 1usize), (255, 1), (65535, 2), (1 << 40, 6), (u64::MAX, 8)] {
            let mut buf = Vec::new();
            write_uint_le(&mut buf, value, bytes).unwrap();
            assert_eq!(buf.len(), bytes);
            assert_eq!(read_uint_le(&buf), value);
        }
    }

    #[test]
    fn test_index_file_path() {
        assert!(index_file_path("/tmp/db").to_string_lossy().ends_with("db.mset"));
        assert!(index_file_path("/tmp/db.mset")
            .to_string_lossy()
            .ends_with("db.mset"));
        assert!(index_file_path("/tmp/db.v2")
            .to_string_lossy()
            .ends_with("db.v2.mset"));
    }
}

//! On-disk layout of series database files.
//!
//! A file is a fixed-size header followed by the archives, finest resolution
//! first. All integers are big-endian. The header is 16 bytes of metadata
//! (aggregation code, max retention, xFilesFactor, archive count) plus one
//! 12-byte descriptor per archive (byte offset, seconds per point, point
//! count). Each archive is a ring of 12-byte points: interval timestamp and
//! an f64 value. An interval of zero marks a slot that has never been
//! written.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::datamodel::{AggregationMethod, Retention};
use crate::storage::error::StorageError;

pub const METADATA_SIZE: u64 = 16;
pub const ARCHIVE_INFO_SIZE: u64 = 12;
pub const POINT_SIZE: u64 = 12;

/// Upper bound on the archive count read from disk; anything larger is a
/// corrupt header rather than a believable configuration.
const MAX_ARCHIVES: u32 = 1024;

/// Descriptor of one archive within a series file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveInfo {
    /// Byte offset of the archive's first point within the file.
    pub offset: u32,
    pub seconds_per_point: u32,
    pub points: u32,
}

impl ArchiveInfo {
    /// Seconds covered by this archive's ring. Descriptors come off disk, so
    /// the product is computed wide rather than trusted to fit 32 bits.
    pub fn retention(&self) -> u64 {
        u64::from(self.seconds_per_point) * u64::from(self.points)
    }

    pub fn size_bytes(&self) -> u64 {
        self.points as u64 * POINT_SIZE
    }

    pub fn as_retention(&self) -> Retention {
        Retention::new(self.seconds_per_point, self.points)
    }
}

/// Decoded series file header.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub aggregation_method: AggregationMethod,
    pub max_retention: u32,
    pub x_files_factor: f32,
    /// Finest resolution first.
    pub archives: Vec<ArchiveInfo>,
}

impl Header {
    pub fn header_size(&self) -> u64 {
        METADATA_SIZE + ARCHIVE_INFO_SIZE * self.archives.len() as u64
    }

    /// Full file size: header plus every archive's ring.
    pub fn total_size(&self) -> u64 {
        self.header_size() + self.archives.iter().map(ArchiveInfo::size_bytes).sum::<u64>()
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, StorageError> {
        let aggregation_code = reader.read_u32::<BigEndian>().map_err(truncated)?;
        let aggregation_method = AggregationMethod::from_code(aggregation_code).ok_or_else(|| {
            StorageError::Corrupt(format!("unknown aggregation code {aggregation_code}"))
        })?;
        let max_retention = reader.read_u32::<BigEndian>().map_err(truncated)?;
        let x_files_factor = reader.read_f32::<BigEndian>().map_err(truncated)?;
        let archive_count = reader.read_u32::<BigEndian>().map_err(truncated)?;
        if archive_count == 0 || archive_count > MAX_ARCHIVES {
            return Err(StorageError::Corrupt(format!(
                "implausible archive count {archive_count}"
            )));
        }
        let mut archives = Vec::with_capacity(archive_count as usize);
        for _ in 0..archive_count {
            archives.push(ArchiveInfo {
                offset: reader.read_u32::<BigEndian>().map_err(truncated)?,
                seconds_per_point: reader.read_u32::<BigEndian>().map_err(truncated)?,
                points: reader.read_u32::<BigEndian>().map_err(truncated)?,
            });
        }
        Ok(Header {
            aggregation_method,
            max_retention,
            x_files_factor,
            archives,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), StorageError> {
        writer.write_u32::<BigEndian>(self.aggregation_method.code())?;
        writer.write_u32::<BigEndian>(self.max_retention)?;
        writer.write_f32::<BigEndian>(self.x_files_factor)?;
        writer.write_u32::<BigEndian>(self.archives.len() as u32)?;
        for archive in &self.archives {
            writer.write_u32::<BigEndian>(archive.offset)?;
            writer.write_u32::<BigEndian>(archive.seconds_per_point)?;
            writer.write_u32::<BigEndian>(archive.points)?;
        }
        Ok(())
    }
}

/// Append one packed point to a write buffer.
pub fn pack_point(buf: &mut Vec<u8>, interval: u32, value: f64) {
    buf.extend_from_slice(&interval.to_be_bytes());
    buf.extend_from_slice(&value.to_be_bytes());
}

fn truncated(e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        StorageError::Corrupt("truncated series header".to_string())
    } else {
        StorageError::Io(e)
    }
}

//! Synchronous round-robin archive engine.
//!
//! Every operation opens the series file, works on it with plain blocking
//! I/O, and returns. Callers are responsible for serializing access to one
//! series; the async adapter in the parent module does so with a per-series
//! lock and offloads these calls to a blocking thread.
//!
//! Archives never grow: each tier holds exactly `points` slots and the
//! oldest interval is overwritten as new ones arrive. A point's slot is
//! addressed relative to the archive's base point (the first slot), so a
//! write is a seek and a single `write_all`, wrapping at the ring boundary.

use std::fs::{File, OpenOptions};
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use super::format::{
    ARCHIVE_INFO_SIZE, ArchiveInfo, Header, METADATA_SIZE, POINT_SIZE, pack_point,
};
use crate::datamodel::{
    AggregationMethod, FetchedSeries, Point, Retention, SeriesInfo, validate_archive_list,
};
use crate::storage::error::StorageError;
use crate::storage::storage::CreateOptions;

/// Zero-fill chunk used when materializing non-sparse files.
const FILL_CHUNK: usize = 16384;

/// Create a new series file. The parent directory must already exist.
pub fn create(
    path: &Path,
    archives: &[Retention],
    x_files_factor: f32,
    aggregation_method: AggregationMethod,
    options: CreateOptions,
) -> Result<(), StorageError> {
    let sorted = validate_archive_list(archives)?;
    if !(0.0..=1.0).contains(&x_files_factor) || !x_files_factor.is_finite() {
        return Err(StorageError::InvalidArchiveConfig(format!(
            "xFilesFactor {x_files_factor} is outside [0.0, 1.0]"
        )));
    }

    let mut file = match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(StorageError::AlreadyExists {
                series: path.display().to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let mut offset = METADATA_SIZE + ARCHIVE_INFO_SIZE * sorted.len() as u64;
    let mut infos = Vec::with_capacity(sorted.len());
    for tier in &sorted {
        let info = ArchiveInfo {
            offset: offset as u32,
            seconds_per_point: tier.seconds_per_point,
            points: tier.points,
        };
        offset += info.size_bytes();
        infos.push(info);
    }
    // validation bounds every tier's coverage to a 32-bit second count
    let max_retention = sorted.iter().map(Retention::retention).max().unwrap_or(0) as u32;
    let header = Header {
        aggregation_method,
        max_retention,
        x_files_factor,
        archives: infos,
    };

    let mut buf = Vec::with_capacity(header.header_size() as usize);
    header.write_to(&mut buf)?;
    file.write_all(&buf)?;
    materialize(&mut file, &header, options)?;
    file.sync_all()?;
    Ok(())
}

/// Reserve or skip the archive space behind the header, per the options.
fn materialize(file: &mut File, header: &Header, options: CreateOptions) -> Result<(), StorageError> {
    let total = header.total_size();
    if options.sparse {
        file.set_len(total)?;
        return Ok(());
    }
    #[cfg(target_os = "linux")]
    if options.preallocate && fallocate_file(file, total).is_ok() {
        return Ok(());
    }
    // fallocate unavailable or refused: write the zeroes ourselves
    let chunk = [0u8; FILL_CHUNK];
    let mut remaining = (total - header.header_size()) as usize;
    while remaining > 0 {
        let n = remaining.min(FILL_CHUNK);
        file.write_all(&chunk[..n])?;
        remaining -= n;
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn fallocate_file(file: &File, len: u64) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    use nix::fcntl::{FallocateFlags, fallocate};

    fallocate(file.as_raw_fd(), FallocateFlags::empty(), 0, len as i64)
        .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
    Ok(())
}

/// Read the series metadata.
pub fn info(path: &Path) -> Result<SeriesInfo, StorageError> {
    let mut file = open_read(path)?;
    let header = Header::read_from(&mut file)?;
    Ok(SeriesInfo {
        aggregation_method: header.aggregation_method,
        max_retention: header.max_retention,
        x_files_factor: header.x_files_factor,
        archives: header
            .archives
            .iter()
            .map(ArchiveInfo::as_retention)
            .collect(),
    })
}

/// Rewrite the stored aggregation method in place, returning the previous one.
pub fn set_aggregation_method(
    path: &Path,
    method: AggregationMethod,
) -> Result<AggregationMethod, StorageError> {
    let mut file = open_rw(path)?;
    let header = Header::read_from(&mut file)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&method.code().to_be_bytes())?;
    file.sync_all()?;
    Ok(header.aggregation_method)
}

/// Merge a batch of datapoints into the series.
///
/// Points are partitioned newest-first across the archives so each lands in
/// the finest tier whose retention still covers its age relative to `now`.
/// Points older than every tier are dropped. Future points land in the
/// finest tier, since real time is not guaranteed monotonic for callers.
pub fn update_many(path: &Path, datapoints: &[Point], now: u32) -> Result<(), StorageError> {
    if datapoints.is_empty() {
        return Ok(());
    }
    let mut file = open_rw(path)?;
    let header = Header::read_from(&mut file)?;

    let mut points = datapoints.to_vec();
    points.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let archive_count = header.archives.len();
    let mut archive_idx = 0;
    let mut current: Vec<Point> = Vec::new();
    'points: for point in &points {
        let age = now as i64 - point.timestamp as i64;
        while age > 0 && header.archives[archive_idx].retention() < age as u64 {
            if !current.is_empty() {
                flush_archive(&mut file, &header, archive_idx, &mut current)?;
            }
            archive_idx += 1;
            if archive_idx == archive_count {
                // everything older than this is outside all retention
                break 'points;
            }
        }
        current.push(*point);
    }
    if archive_idx < archive_count && !current.is_empty() {
        flush_archive(&mut file, &header, archive_idx, &mut current)?;
    }
    file.sync_all()?;
    Ok(())
}

fn flush_archive(
    file: &mut File,
    header: &Header,
    archive_idx: usize,
    current: &mut Vec<Point>,
) -> Result<(), StorageError> {
    // collected newest-first, written in chronological order
    current.reverse();
    archive_update_many(file, header, archive_idx, current)?;
    current.clear();
    Ok(())
}

/// Write one archive's share of a batch, then cascade aggregates downward.
fn archive_update_many(
    file: &mut File,
    header: &Header,
    archive_idx: usize,
    points: &[Point],
) -> Result<(), StorageError> {
    let archive = header.archives[archive_idx];
    let step = archive.seconds_per_point;

    // align to the step; the last point in a run of duplicates wins
    let mut aligned: Vec<(u32, f64)> = Vec::with_capacity(points.len());
    for point in points {
        let interval = point.align(step);
        match aligned.last_mut() {
            Some((last, value)) if *last == interval => *value = point.value,
            _ => aligned.push((interval, point.value)),
        }
    }

    // pack contiguous intervals into single writes
    let mut runs: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut previous: Option<u32> = None;
    for &(interval, value) in &aligned {
        let contiguous = previous.is_some_and(|prev| interval == prev + step);
        if !contiguous {
            runs.push((interval, Vec::new()));
        }
        if let Some((_, buf)) = runs.last_mut() {
            pack_point(buf, interval, value);
        }
        previous = Some(interval);
    }
    let first_interval = match runs.first() {
        Some((interval, _)) => *interval,
        None => return Ok(()),
    };

    // an empty archive anchors its ring at the first write
    let (stored_base, _) = read_base(file, &archive)?;
    let base_interval = if stored_base == 0 {
        first_interval
    } else {
        stored_base
    };

    let archive_start = archive.offset as u64;
    let archive_end = archive_start + archive.size_bytes();
    for (interval, buf) in &runs {
        let offset = point_offset(&archive, base_interval, *interval);
        let overrun = (offset + buf.len() as u64).saturating_sub(archive_end) as usize;
        file.seek(SeekFrom::Start(offset))?;
        if overrun > 0 {
            let split = buf.len() - overrun;
            file.write_all(&buf[..split])?;
            file.seek(SeekFrom::Start(archive_start))?;
            file.write_all(&buf[split..])?;
        } else {
            file.write_all(buf)?;
        }
    }

    // cascade into coarser archives while windows keep meeting the factor
    let mut higher_idx = archive_idx;
    for lower_idx in archive_idx + 1..header.archives.len() {
        let lower_step = header.archives[lower_idx].seconds_per_point;
        let mut windows: Vec<u32> = aligned
            .iter()
            .map(|(interval, _)| interval - (interval % lower_step))
            .collect();
        windows.sort_unstable();
        windows.dedup();

        let mut propagated = false;
        for window in windows {
            if propagate(file, header, window, higher_idx, lower_idx)? {
                propagated = true;
            }
        }
        if !propagated {
            break;
        }
        higher_idx = lower_idx;
    }
    Ok(())
}

/// Consolidate one coarser-tier window from its finer-tier slots.
///
/// Returns whether a value was written, which requires at least one known
/// slot and a known fraction meeting the xFilesFactor.
fn propagate(
    file: &mut File,
    header: &Header,
    window_start: u32,
    higher_idx: usize,
    lower_idx: usize,
) -> Result<bool, StorageError> {
    let higher = header.archives[higher_idx];
    let lower = header.archives[lower_idx];

    let (higher_base, _) = read_base(file, &higher)?;
    let first_offset = if higher_base == 0 {
        higher.offset as u64
    } else {
        point_offset(&higher, higher_base, window_start)
    };
    let slots = (lower.seconds_per_point / higher.seconds_per_point) as u64;
    let relative_first = first_offset - higher.offset as u64;
    let relative_last = (relative_first + slots * POINT_SIZE) % higher.size_bytes();
    let last_offset = higher.offset as u64 + relative_last;
    let series = read_ring(file, &higher, first_offset, last_offset)?;

    // only slots whose stored interval matches their expected position count
    let total_slots = series.len() as u64 / POINT_SIZE;
    let mut known = Vec::with_capacity(total_slots as usize);
    let mut cursor = Cursor::new(&series);
    let mut expected = window_start;
    for _ in 0..total_slots {
        let interval = cursor.read_u32::<BigEndian>()?;
        let value = cursor.read_f64::<BigEndian>()?;
        if interval == expected {
            known.push(value);
        }
        expected += higher.seconds_per_point;
    }
    if known.is_empty() {
        return Ok(false);
    }
    let known_fraction = known.len() as f32 / total_slots as f32;
    if known_fraction < header.x_files_factor {
        return Ok(false);
    }
    let aggregated = match header.aggregation_method.aggregate(&known) {
        Some(value) => value,
        None => return Ok(false),
    };

    let (lower_base, _) = read_base(file, &lower)?;
    let offset = if lower_base == 0 {
        lower.offset as u64
    } else {
        point_offset(&lower, lower_base, window_start)
    };
    let mut buf = Vec::with_capacity(POINT_SIZE as usize);
    pack_point(&mut buf, window_start, aggregated);
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&buf)?;
    Ok(true)
}

/// Fetch the window `(from, until]`.
///
/// The window is clamped to `(now - max_retention, now]` and served from the
/// finest archive still covering its start. `Ok(None)` means the window lies
/// entirely outside retention.
pub fn fetch(
    path: &Path,
    from: u32,
    until: u32,
    now: u32,
) -> Result<Option<FetchedSeries>, StorageError> {
    if from >= until {
        return Err(StorageError::InvalidRange { from, until });
    }
    let mut file = open_read(path)?;
    let header = Header::read_from(&mut file)?;

    let oldest = now.saturating_sub(header.max_retention);
    if from > now || until < oldest {
        return Ok(None);
    }
    let from = from.max(oldest);
    let until = until.min(now);

    let age = now - from;
    let archive = match header.archives.iter().find(|a| a.retention() >= u64::from(age)) {
        Some(archive) => *archive,
        // clamping keeps `age` within max_retention, so the coarsest archive
        // always qualifies; guard anyway for a header with a bad max_retention
        None => match header.archives.last() {
            Some(archive) => *archive,
            None => {
                return Err(StorageError::Corrupt(
                    "header holds no archives".to_string(),
                ));
            }
        },
    };
    archive_fetch(&mut file, &archive, from, until).map(Some)
}

fn archive_fetch(
    file: &mut File,
    archive: &ArchiveInfo,
    from: u32,
    until: u32,
) -> Result<FetchedSeries, StorageError> {
    let step = archive.seconds_per_point;
    let from_interval = from - (from % step) + step;
    let mut until_interval = until - (until % step) + step;
    if from_interval == until_interval {
        until_interval += step;
    }

    let (base_interval, _) = read_base(file, archive)?;
    if base_interval == 0 {
        // never written: the whole window is unknown
        let slots = ((until_interval - from_interval) / step) as usize;
        return Ok(FetchedSeries {
            from: from_interval,
            until: until_interval,
            step,
            values: vec![None; slots],
        });
    }

    let from_offset = point_offset(archive, base_interval, from_interval);
    let until_offset = point_offset(archive, base_interval, until_interval);
    let series = read_ring(file, archive, from_offset, until_offset)?;

    let slots = series.len() as u64 / POINT_SIZE;
    let mut values = Vec::with_capacity(slots as usize);
    let mut cursor = Cursor::new(&series);
    let mut expected = from_interval;
    for _ in 0..slots {
        let interval = cursor.read_u32::<BigEndian>()?;
        let value = cursor.read_f64::<BigEndian>()?;
        values.push(if interval == expected { Some(value) } else { None });
        expected += step;
    }
    Ok(FetchedSeries {
        from: from_interval,
        until: until_interval,
        step,
        values,
    })
}

/// Byte offset of `interval`'s slot, relative to the archive's base point.
fn point_offset(archive: &ArchiveInfo, base_interval: u32, interval: u32) -> u64 {
    let time_distance = interval as i64 - base_interval as i64;
    let point_distance = time_distance / archive.seconds_per_point as i64;
    let byte_distance = point_distance * POINT_SIZE as i64;
    archive.offset as u64 + byte_distance.rem_euclid(archive.size_bytes() as i64) as u64
}

/// Read the archive's base point, the anchor of its ring.
fn read_base(file: &mut File, archive: &ArchiveInfo) -> Result<(u32, f64), StorageError> {
    file.seek(SeekFrom::Start(archive.offset as u64))?;
    let interval = file.read_u32::<BigEndian>()?;
    let value = file.read_f64::<BigEndian>()?;
    Ok((interval, value))
}

/// Read `[from_offset, until_offset)` within the archive, wrapping at its
/// end. Equal offsets mean one full revolution, not an empty read.
fn read_ring(
    file: &mut File,
    archive: &ArchiveInfo,
    from_offset: u64,
    until_offset: u64,
) -> Result<Vec<u8>, StorageError> {
    file.seek(SeekFrom::Start(from_offset))?;
    if from_offset < until_offset {
        let mut buf = vec![0u8; (until_offset - from_offset) as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    } else {
        let archive_start = archive.offset as u64;
        let archive_end = archive_start + archive.size_bytes();
        let mut buf = vec![0u8; (archive_end - from_offset) as usize];
        file.read_exact(&mut buf)?;
        let mut rest = vec![0u8; (until_offset - archive_start) as usize];
        file.seek(SeekFrom::Start(archive_start))?;
        file.read_exact(&mut rest)?;
        buf.extend_from_slice(&rest);
        Ok(buf)
    }
}

fn open_read(path: &Path) -> Result<File, StorageError> {
    File::open(path).map_err(|e| missing_or_io(path, e))
}

fn open_rw(path: &Path) -> Result<File, StorageError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| missing_or_io(path, e))
}

fn missing_or_io(path: &Path, e: std::io::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::NotFound {
            series: path.display().to_string(),
        }
    } else {
        StorageError::Io(e)
    }
}

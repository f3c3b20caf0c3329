use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::storage::error::StorageError;

/// One retention tier: a fixed-capacity ring of points at a fixed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Retention {
    pub seconds_per_point: u32,
    pub points: u32,
}

impl Retention {
    pub fn new(seconds_per_point: u32, points: u32) -> Self {
        Self {
            seconds_per_point,
            points,
        }
    }

    /// Total duration covered by this tier, in seconds. Computed wide, so
    /// even a pathological tier cannot overflow before validation rejects it.
    pub fn retention(&self) -> u64 {
        u64::from(self.seconds_per_point) * u64::from(self.points)
    }
}

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\s*([smhdwy]?)$").expect("static regex must compile")
});

fn unit_multiplier(unit: &str) -> u32 {
    match unit {
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 7 * 86400,
        "y" => 365 * 86400,
        // "s" or no unit
        _ => 1,
    }
}

fn parse_duration(part: &str, definition: &str) -> Result<(u32, bool), StorageError> {
    let caps = DURATION_RE.captures(part.trim()).ok_or_else(|| {
        StorageError::InvalidArchiveConfig(format!(
            "bad retention definition {definition:?}: {part:?} is not a count or duration"
        ))
    })?;
    let amount: u32 = caps[1].parse().map_err(|_| {
        StorageError::InvalidArchiveConfig(format!(
            "bad retention definition {definition:?}: {part:?} is out of range"
        ))
    })?;
    let unit = &caps[2];
    let seconds = amount.checked_mul(unit_multiplier(unit)).ok_or_else(|| {
        StorageError::InvalidArchiveConfig(format!(
            "bad retention definition {definition:?}: {part:?} overflows"
        ))
    })?;
    Ok((seconds, !unit.is_empty()))
}

impl FromStr for Retention {
    type Err = StorageError;

    /// Parse a `precision:points` retention definition.
    ///
    /// Both halves accept either a bare number or a duration with an
    /// `s`/`m`/`h`/`d`/`w`/`y` suffix. When the second half carries a unit it
    /// is a total duration and the point count is derived from the precision,
    /// so `"10s:7d"` means one point every 10 seconds for 7 days.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (precision_part, points_part) = s.split_once(':').ok_or_else(|| {
            StorageError::InvalidArchiveConfig(format!(
                "bad retention definition {s:?}, expected precision:points"
            ))
        })?;
        let (seconds_per_point, _) = parse_duration(precision_part, s)?;
        let (points_or_duration, has_unit) = parse_duration(points_part, s)?;
        if seconds_per_point == 0 {
            return Err(StorageError::InvalidArchiveConfig(format!(
                "bad retention definition {s:?}: precision must be positive"
            )));
        }
        let points = if has_unit {
            points_or_duration / seconds_per_point
        } else {
            points_or_duration
        };
        if points == 0 {
            return Err(StorageError::InvalidArchiveConfig(format!(
                "bad retention definition {s:?}: must hold at least one point"
            )));
        }
        Ok(Retention::new(seconds_per_point, points))
    }
}

/// Check a set of retention tiers for consistency and return them sorted
/// finest-resolution first, the order they are laid out on disk.
///
/// Rules: tiers must have distinct precisions; every coarser precision must be
/// an even multiple of every finer one; coarser tiers must cover strictly
/// longer windows; and each tier must hold at least one full step of the next
/// coarser tier so consolidation windows are always complete.
pub fn validate_archive_list(archives: &[Retention]) -> Result<Vec<Retention>, StorageError> {
    if archives.is_empty() {
        return Err(StorageError::InvalidArchiveConfig(
            "at least one retention tier is required".to_string(),
        ));
    }
    if let Some(bad) = archives
        .iter()
        .find(|a| a.seconds_per_point == 0 || a.points == 0)
    {
        return Err(StorageError::InvalidArchiveConfig(format!(
            "tier {}:{} has a zero dimension",
            bad.seconds_per_point, bad.points
        )));
    }
    // the file header records retention as a 32-bit second count
    if let Some(bad) = archives
        .iter()
        .find(|a| a.retention() > u64::from(u32::MAX))
    {
        return Err(StorageError::InvalidArchiveConfig(format!(
            "tier {}:{} covers more time than a series file can record",
            bad.seconds_per_point, bad.points
        )));
    }

    let mut sorted = archives.to_vec();
    sorted.sort_by_key(|a| a.seconds_per_point);

    for pair in sorted.windows(2) {
        let (finer, coarser) = (pair[0], pair[1]);
        if finer.seconds_per_point == coarser.seconds_per_point {
            return Err(StorageError::InvalidArchiveConfig(format!(
                "two tiers share the same precision of {} seconds",
                finer.seconds_per_point
            )));
        }
        if coarser.seconds_per_point % finer.seconds_per_point != 0 {
            return Err(StorageError::InvalidArchiveConfig(format!(
                "coarser precision {} is not a multiple of finer precision {}",
                coarser.seconds_per_point, finer.seconds_per_point
            )));
        }
        if coarser.retention() <= finer.retention() {
            return Err(StorageError::InvalidArchiveConfig(format!(
                "coarser tier covers {}s which does not exceed the finer tier's {}s",
                coarser.retention(),
                finer.retention()
            )));
        }
        let points_per_window = coarser.seconds_per_point / finer.seconds_per_point;
        if finer.points < points_per_window {
            return Err(StorageError::InvalidArchiveConfig(format!(
                "tier with {} points cannot fill one {}-second window of the next tier",
                finer.points, coarser.seconds_per_point
            )));
        }
    }
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_numbers() {
        let r: Retention = "60:1440".parse().unwrap();
        assert_eq!(r, Retention::new(60, 1440));
        assert_eq!(r.retention(), 86400);
    }

    #[test]
    fn test_parse_with_units() {
        assert_eq!(
            "10s:7d".parse::<Retention>().unwrap(),
            Retention::new(10, 60480)
        );
        assert_eq!(
            "1m:30d".parse::<Retention>().unwrap(),
            Retention::new(60, 43200)
        );
        assert_eq!(
            "1h:1y".parse::<Retention>().unwrap(),
            Retention::new(3600, 8760)
        );
        // mixed: plain precision, duration points
        assert_eq!(
            "300:1d".parse::<Retention>().unwrap(),
            Retention::new(300, 288)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "60", "60:", ":1440", "60:x", "1q:7d", "0s:7d", "10s:5s"] {
            assert!(
                matches!(
                    bad.parse::<Retention>(),
                    Err(StorageError::InvalidArchiveConfig(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_accepts_and_sorts() {
        let tiers = [
            Retention::new(300, 1000),
            Retention::new(60, 1440),
            Retention::new(3600, 8760),
        ];
        let sorted = validate_archive_list(&tiers).unwrap();
        assert_eq!(
            sorted,
            vec![
                Retention::new(60, 1440),
                Retention::new(300, 1000),
                Retention::new(3600, 8760),
            ]
        );
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(validate_archive_list(&[]).is_err());
    }

    #[test]
    fn test_validate_rejects_overflowing_retention() {
        // one year per point for 200 points does not fit a 32-bit retention
        let tiers = [Retention::new(60, 100), Retention::new(31_536_000, 200)];
        assert!(matches!(
            validate_archive_list(&tiers),
            Err(StorageError::InvalidArchiveConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_precision() {
        let tiers = [Retention::new(60, 100), Retention::new(60, 200)];
        assert!(validate_archive_list(&tiers).is_err());
    }

    #[test]
    fn test_validate_rejects_uneven_precision() {
        let tiers = [Retention::new(60, 1000), Retention::new(90, 1000)];
        assert!(validate_archive_list(&tiers).is_err());
    }

    #[test]
    fn test_validate_rejects_shrinking_retention() {
        // coarser tier covers less total time than the finer one
        let tiers = [Retention::new(60, 1000), Retention::new(120, 100)];
        assert!(validate_archive_list(&tiers).is_err());
    }

    #[test]
    fn test_validate_rejects_unconsolidatable_tier() {
        // finer tier has 3 points but one coarser step needs 5
        let tiers = [Retention::new(60, 3), Retention::new(300, 100)];
        assert!(validate_archive_list(&tiers).is_err());
    }
}

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of stored size variants. Only `Original` is the canonical file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeVariantKind {
    Original,
    Medium2x,
    Medium,
    Small2x,
    Small,
    Thumb2x,
    Thumb,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeVariant {
    pub kind: SizeVariantKind,
    /// Path relative to the library root (or absolute)
    pub path: PathBuf,
    /// File size in bytes as recorded at import
    #[serde(default)]
    pub filesize: u64,
    /// Hex checksum recorded at import
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Capture time: an instant together with the name of the zone it was taken in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakenAt {
    pub instant: DateTime<FixedOffset>,
    pub timezone: String,
}

impl TakenAt {
    pub fn new(instant: DateTime<FixedOffset>, timezone: impl Into<String>) -> Self {
        Self {
            instant,
            timezone: timezone.into(),
        }
    }

    pub fn utc(instant: DateTime<Utc>) -> Self {
        Self::new(instant.fixed_offset(), "UTC")
    }

    /// Same point on the timeline *and* the same zone name.
    ///
    /// `2022-01-31 20:50 +01:00` and `2022-01-31 19:50 UTC` are the same
    /// instant but are not the same capture time: the zone is stored data.
    pub fn same_as(&self, other: &TakenAt) -> bool {
        self.instant == other.instant && self.timezone == other.timezone
    }
}

impl fmt::Display for TakenAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.instant.format("%Y-%m-%d at %H:%M:%S"),
            self.timezone
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub taken_at: Option<TakenAt>,
    /// Upload time
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub size_variants: Vec<SizeVariant>,
}

impl MediaRecord {
    pub fn new(id: u64, title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            taken_at: None,
            created_at,
            size_variants: Vec::new(),
        }
    }

    pub fn with_original(mut self, path: impl Into<PathBuf>) -> Self {
        self.size_variants.push(SizeVariant {
            kind: SizeVariantKind::Original,
            path: path.into(),
            filesize: 0,
            checksum: None,
        });
        self
    }

    pub fn with_taken_at(mut self, taken_at: TakenAt) -> Self {
        self.taken_at = Some(taken_at);
        self
    }

    pub fn original(&self) -> Option<&SizeVariant> {
        self.size_variants
            .iter()
            .find(|v| v.kind == SizeVariantKind::Original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_same_instant_different_zone_is_not_same() {
        let cet = FixedOffset::east_opt(3600).unwrap();
        let berlin = cet.with_ymd_and_hms(2022, 1, 31, 20, 50, 0).unwrap();
        let a = TakenAt::new(berlin, "Europe/Berlin");
        let b = TakenAt::utc(Utc.with_ymd_and_hms(2022, 1, 31, 19, 50, 0).unwrap());

        assert_eq!(a.instant, b.instant);
        assert!(!a.same_as(&b));
        assert!(a.same_as(&a.clone()));
    }

    #[test]
    fn test_display() {
        let t = TakenAt::utc(Utc.with_ymd_and_hms(2022, 1, 31, 19, 50, 0).unwrap());
        assert_eq!(t.to_string(), "2022-01-31 at 19:50:00 (UTC)");
    }

    #[test]
    fn test_original_lookup() {
        let mut record = MediaRecord::new(1, "beach", Utc::now());
        assert!(record.original().is_none());
        record.size_variants.push(SizeVariant {
            kind: SizeVariantKind::Thumb,
            path: "thumb/a.jpg".into(),
            filesize: 10,
            checksum: None,
        });
        let record = record.with_original("big/a.jpg");
        assert_eq!(record.original().unwrap().path, PathBuf::from("big/a.jpg"));
    }
}

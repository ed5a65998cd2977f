//! Capture time extraction from media files.

pub mod exif;
pub mod guess;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

use crate::model::TakenAt;

/// Metadata read from one file. Only what the library consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedMetadata {
    pub taken_at: Option<TakenAt>,
    pub make: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid metadata in {}: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },
}

pub trait MetadataExtractor {
    /// `fallback` is the file's last-modified time, for formats that carry
    /// no capture time of their own.
    fn extract(
        &self,
        path: &Path,
        fallback: DateTime<Utc>,
    ) -> Result<ExtractedMetadata, ExtractError>;
}

#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    /// Offset applied to wall-clock times that carry none
    pub default_offset: FixedOffset,
    /// Zone name stored alongside `default_offset`
    pub default_timezone: String,
    /// Try camera/phone file name patterns when EXIF has no date
    pub guess_from_filename: bool,
    /// Use the fallback timestamp for videos
    pub video_fallback: bool,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            default_offset: FixedOffset::east_opt(0).expect("zero offset"),
            default_timezone: "UTC".to_string(),
            guess_from_filename: false,
            video_fallback: true,
        }
    }
}

/// Default extractor: EXIF first, then file name, then (videos) mtime.
#[derive(Debug, Clone, Default)]
pub struct ExifExtractor {
    options: ExtractorOptions,
}

impl ExifExtractor {
    pub fn new(options: ExtractorOptions) -> Self {
        Self { options }
    }

    fn in_default_zone(&self, local: NaiveDateTime) -> Option<TakenAt> {
        let instant = self.options.default_offset.from_local_datetime(&local).single()?;
        Some(TakenAt::new(instant, self.options.default_timezone.clone()))
    }
}

impl MetadataExtractor for ExifExtractor {
    fn extract(
        &self,
        path: &Path,
        fallback: DateTime<Utc>,
    ) -> Result<ExtractedMetadata, ExtractError> {
        let io_err = |source: std::io::Error| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mime = mime_guess::from_path(path).first();
        let is_video = mime.as_ref().is_some_and(|m| m.type_() == mime_guess::mime::VIDEO);

        let mut metadata = ExtractedMetadata::default();

        if !is_video {
            let file = File::open(path).map_err(io_err)?;
            if let Some(parsed) = exif::read_exif(&mut BufReader::new(file)).map_err(io_err)? {
                metadata.make = exif::ascii_field(&parsed, ::exif::Tag::Make);
                metadata.model = exif::ascii_field(&parsed, ::exif::Tag::Model);
                if let Some(date) = exif::capture_date(&parsed) {
                    metadata.taken_at = match date.offset {
                        Some(offset) => {
                            let instant = offset
                                .from_local_datetime(&date.local)
                                .single()
                                .ok_or_else(|| ExtractError::Invalid {
                                    path: path.to_path_buf(),
                                    reason: format!("unrepresentable capture time {}", date.local),
                                })?;
                            Some(TakenAt::new(instant, offset.to_string()))
                        }
                        None => self.in_default_zone(date.local),
                    };
                }
            }
        }

        if metadata.taken_at.is_none() && self.options.guess_from_filename {
            metadata.taken_at =
                guess::guess_date_from_filename(path).and_then(|dt| self.in_default_zone(dt));
        }

        if metadata.taken_at.is_none() && is_video && self.options.video_fallback {
            let instant = fallback.with_timezone(&self.options.default_offset);
            metadata.taken_at = Some(TakenAt::new(instant, self.options.default_timezone.clone()));
        }

        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fallback() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, 31, 19, 50, 0).unwrap()
    }

    #[test]
    fn test_image_without_exif_has_no_capture_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("holiday.jpg");
        std::fs::write(&path, b"not really a jpeg").unwrap();

        let meta = ExifExtractor::default().extract(&path, fallback()).unwrap();
        assert_eq!(meta, ExtractedMetadata::default());
    }

    #[test]
    fn test_filename_guess_uses_default_zone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("IMG_20190509_154733.jpg");
        std::fs::write(&path, b"not really a jpeg").unwrap();

        let extractor = ExifExtractor::new(ExtractorOptions {
            default_offset: FixedOffset::east_opt(9 * 3600).unwrap(),
            default_timezone: "Asia/Tokyo".to_string(),
            guess_from_filename: true,
            ..Default::default()
        });
        let taken_at = extractor.extract(&path, fallback()).unwrap().taken_at.unwrap();

        assert_eq!(taken_at.timezone, "Asia/Tokyo");
        assert_eq!(taken_at.instant.to_rfc3339(), "2019-05-09T15:47:33+09:00");
    }

    #[test]
    fn test_video_falls_back_to_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"\0\0\0\x18ftypmp42").unwrap();

        let taken_at = ExifExtractor::default()
            .extract(&path, fallback())
            .unwrap()
            .taken_at
            .unwrap();
        assert!(taken_at.same_as(&TakenAt::utc(fallback())));

        let strict = ExifExtractor::new(ExtractorOptions {
            video_fallback: false,
            ..Default::default()
        });
        assert!(strict.extract(&path, fallback()).unwrap().taken_at.is_none());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = ExifExtractor::default().extract(&dir.path().join("gone.jpg"), fallback());
        assert!(matches!(result, Err(ExtractError::Io { .. })));
    }
}

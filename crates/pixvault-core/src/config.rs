use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::digest::DigestAlgorithm;
use crate::extract::exif::parse_offset;
use crate::extract::ExtractorOptions;
use crate::takedate::TakedateOptions;

/// Default config file name inside the library root.
pub const CONFIG_FILENAME: &str = "pixvault.json";

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_records() -> PathBuf {
    PathBuf::from("library.json")
}

fn default_hash_algorithm() -> String {
    DigestAlgorithm::default().name().to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directory that size variant paths are relative to
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Library records file, relative to `root` unless absolute
    #[serde(default = "default_records")]
    pub records: PathBuf,
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,
    /// Zone name stored for capture times that carry no offset
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    /// Offset matching `default_timezone`, e.g. "+09:00"
    #[serde(default = "default_utc_offset")]
    pub default_utc_offset: String,
    #[serde(default)]
    pub guess_from_filename: bool,
    #[serde(default = "default_true")]
    pub video_fallback: bool,
    #[serde(default)]
    pub takedate: TakedateOptions,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            records: default_records(),
            hash_algorithm: default_hash_algorithm(),
            default_timezone: default_timezone(),
            default_utc_offset: default_utc_offset(),
            guess_from_filename: false,
            video_fallback: true,
            takedate: TakedateOptions::default(),
        }
    }
}

impl LibraryConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("opening config {}", path.display()))?;
        let config: LibraryConfig = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `<cwd>/pixvault.json` if present, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None if Path::new(CONFIG_FILENAME).exists() => Self::load(Path::new(CONFIG_FILENAME)),
            None => Ok(Self::default()),
        }
    }

    /// Reject settings that would only fail later, mid-job or mid-stream.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.digest_algorithm()?;
        self.utc_offset()?;
        Ok(())
    }

    pub fn digest_algorithm(&self) -> anyhow::Result<DigestAlgorithm> {
        Ok(self.hash_algorithm.parse::<DigestAlgorithm>()?)
    }

    pub fn utc_offset(&self) -> anyhow::Result<FixedOffset> {
        parse_offset(&self.default_utc_offset)
            .ok_or_else(|| anyhow!("invalid default_utc_offset {:?}", self.default_utc_offset))
    }

    pub fn records_path(&self) -> PathBuf {
        self.root.join(&self.records)
    }

    pub fn extractor_options(&self) -> anyhow::Result<ExtractorOptions> {
        Ok(ExtractorOptions {
            default_offset: self.utc_offset()?,
            default_timezone: self.default_timezone.clone(),
            guess_from_filename: self.guess_from_filename,
            video_fallback: self.video_fallback,
        })
    }
}

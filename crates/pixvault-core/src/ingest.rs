use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use filetime::FileTime;

use crate::digest::DigestAlgorithm;
use crate::stream_stat::{copy_with_stat, StreamStatFilter};

/// A file copied into library storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub checksum: String,
}

/// Copy `source` to `dest`, checksumming on the way.
///
/// The data goes to a temporary sibling of `dest` first and is renamed into
/// place once complete, so `dest` never holds a partial file. The source's
/// mtime is carried over.
pub fn import_file(
    source: &Path,
    dest: &Path,
    algorithm: DigestAlgorithm,
) -> anyhow::Result<ImportedFile> {
    if dest.exists() {
        bail!("destination {} already exists", dest.display());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    let src_file = File::open(source).with_context(|| format!("opening {}", source.display()))?;
    let mtime = FileTime::from_last_modification_time(&src_file.metadata()?);

    let temp_path = temp_path_for(dest);
    let copied = (|| -> anyhow::Result<_> {
        let mut reader = BufReader::new(src_file);
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        let filter = StreamStatFilter::attached(algorithm);
        let stat = copy_with_stat(&mut reader, &mut writer, filter)?;
        let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_all()?;
        filetime::set_file_handle_times(&file, None, Some(mtime))
            .context("preserving source modification time")?;
        Ok(stat)
    })();

    let stat = match copied {
        Ok(Some(stat)) => stat,
        Ok(None) => {
            fs::remove_file(&temp_path).ok();
            bail!("no stream statistics collected for {}", source.display());
        }
        Err(e) => {
            fs::remove_file(&temp_path).ok();
            return Err(e.context(format!("copying {} to {}", source.display(), dest.display())));
        }
    };

    fs::rename(&temp_path, dest).with_context(|| format!("moving file into {}", dest.display()))?;

    tracing::debug!(path = %dest.display(), bytes = stat.bytes, "imported media file");

    Ok(ImportedFile {
        path: dest.to_path_buf(),
        bytes: stat.bytes,
        checksum: stat.checksum.unwrap_or_default(),
    })
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "import".to_string());
    dest.with_file_name(format!(".{name}.part"))
}

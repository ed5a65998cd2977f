use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::model::MediaRecord;

/// Which records a batch may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    /// Only records without a stored capture time
    pub needs_taken_at: bool,
}

impl Selection {
    pub fn matches(&self, record: &MediaRecord) -> bool {
        !self.needs_taken_at || record.taken_at.is_none()
    }
}

/// Window over the id-ordered selection. `limit == 0` means no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

/// Storage of media records.
///
/// `find_matching` must order by ascending id before applying the page,
/// otherwise offset/limit pagination is not deterministic.
pub trait MediaRepository {
    fn count(&self, selection: &Selection) -> anyhow::Result<u64>;

    fn find_matching(&self, selection: &Selection, page: Page) -> anyhow::Result<Vec<MediaRecord>>;

    fn save(&mut self, record: &MediaRecord) -> anyhow::Result<()>;
}

fn paginate<'a>(
    records: impl Iterator<Item = &'a MediaRecord>,
    selection: &Selection,
    page: Page,
) -> Vec<MediaRecord> {
    let matching = records
        .filter(|r| selection.matches(r))
        .skip(page.offset as usize)
        .cloned();
    if page.limit == 0 {
        matching.collect()
    } else {
        matching.take(page.limit as usize).collect()
    }
}

/// Records held in memory, keyed (and therefore ordered) by id.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    records: BTreeMap<u64, MediaRecord>,
    saves: u64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: MediaRecord) {
        self.records.insert(record.id, record);
    }

    pub fn get(&self, id: u64) -> Option<&MediaRecord> {
        self.records.get(&id)
    }

    /// Number of successful `save` calls.
    pub fn saves(&self) -> u64 {
        self.saves
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<MediaRecord> for InMemoryRepository {
    fn from_iter<I: IntoIterator<Item = MediaRecord>>(iter: I) -> Self {
        let mut repo = Self::new();
        for record in iter {
            repo.insert(record);
        }
        repo
    }
}

impl MediaRepository for InMemoryRepository {
    fn count(&self, selection: &Selection) -> anyhow::Result<u64> {
        Ok(self.records.values().filter(|r| selection.matches(r)).count() as u64)
    }

    fn find_matching(&self, selection: &Selection, page: Page) -> anyhow::Result<Vec<MediaRecord>> {
        Ok(paginate(self.records.values(), selection, page))
    }

    fn save(&mut self, record: &MediaRecord) -> anyhow::Result<()> {
        let Some(stored) = self.records.get_mut(&record.id) else {
            bail!("media record {} does not exist", record.id);
        };
        *stored = record.clone();
        self.saves += 1;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryFile {
    records: Vec<MediaRecord>,
}

/// Records stored in a single JSON library file.
///
/// Every `save` rewrites the file (temp file, then rename), so records
/// already reconciled survive an interrupted batch.
pub struct JsonFileRepository {
    path: PathBuf,
    inner: InMemoryRepository,
}

impl JsonFileRepository {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("opening library file {}", path.display()))?;
        let library: LibraryFile = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing library file {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: library.records.into_iter().collect(),
        })
    }

    /// Create a library file holding `records`. Fails if the file exists.
    pub fn create(path: &Path, records: Vec<MediaRecord>) -> anyhow::Result<Self> {
        if path.exists() {
            bail!("library file {} already exists", path.display());
        }
        let repo = Self {
            path: path.to_path_buf(),
            inner: records.into_iter().collect(),
        };
        repo.persist()?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: u64) -> Option<&MediaRecord> {
        self.inner.get(id)
    }

    fn persist(&self) -> anyhow::Result<()> {
        let temp_path = self.path.with_extension("json.tmp");
        let library = LibraryFile {
            records: self.inner.records.values().cloned().collect(),
        };

        let written = (|| -> anyhow::Result<()> {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            serde_json::to_writer_pretty(&mut writer, &library)?;
            writer.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()?;
            Ok(())
        })();
        // The library file is only replaced by a completely written copy
        if let Err(e) = written {
            fs::remove_file(&temp_path).ok();
            return Err(e.context(format!("writing {}", temp_path.display())));
        }

        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("replacing library file {}", self.path.display()))?;
        Ok(())
    }
}

impl MediaRepository for JsonFileRepository {
    fn count(&self, selection: &Selection) -> anyhow::Result<u64> {
        self.inner.count(selection)
    }

    fn find_matching(&self, selection: &Selection, page: Page) -> anyhow::Result<Vec<MediaRecord>> {
        self.inner.find_matching(selection, page)
    }

    fn save(&mut self, record: &MediaRecord) -> anyhow::Result<()> {
        self.inner.save(record)?;
        self.persist()
    }
}

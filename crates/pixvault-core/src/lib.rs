pub mod config;
pub mod digest;
pub mod extract;
pub mod ingest;
pub mod model;
pub mod repository;
pub mod resolve;
pub mod stream_stat;
pub mod takedate;

pub use config::LibraryConfig;
pub use digest::{DigestAccumulator, DigestAlgorithm};
pub use extract::{
    ExifExtractor, ExtractError, ExtractedMetadata, ExtractorOptions, MetadataExtractor,
};
pub use ingest::{import_file, ImportedFile};
pub use model::{MediaRecord, SizeVariant, SizeVariantKind, TakenAt};
pub use repository::{InMemoryRepository, JsonFileRepository, MediaRepository, Page, Selection};
pub use resolve::{FileResolver, LocalFile, LocalFsResolver, ResolveError};
pub use stream_stat::{
    checksum_file, copy_with_stat, StatReader, StatWriter, StreamError, StreamStat,
    StreamStatFilter,
};
pub use takedate::{
    EventSink, JobEvent, JobReport, JobStatus, RecordOutcome, RecordReport, TakedateOptions,
    TakenAtCheck, UploadTimeCheck,
};

/// Reconcile capture times of the library described by `config`.
///
/// Opens the records file and runs [`takedate::run`] with the local
/// filesystem resolver and the EXIF extractor.
pub fn reconcile_library(
    config: &LibraryConfig,
    options: &TakedateOptions,
    sink: &EventSink<'_>,
) -> anyhow::Result<JobReport> {
    config.validate()?;
    let mut repo = JsonFileRepository::open(&config.records_path())?;
    let resolver = LocalFsResolver::new(&config.root);
    let extractor = ExifExtractor::new(config.extractor_options()?);
    takedate::run(&mut repo, &resolver, &extractor, options, sink)
}

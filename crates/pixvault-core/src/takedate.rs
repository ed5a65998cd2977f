//! Re-derive capture times ("takedates") of stored media from their files.
//!
//! The job walks an id-ordered window of records, extracts the capture
//! time of each original file and writes it back only when it differs from
//! the stored one. Per-record problems are reported, never propagated; only
//! repository failures abort the job.
//!
//! The whole window is loaded up front. A huge `limit` (or `limit = 0` over
//! a huge library) therefore costs memory proportional to the window.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::MetadataExtractor;
use crate::model::{MediaRecord, TakenAt};
use crate::repository::{MediaRepository, Page, Selection};
use crate::resolve::FileResolver;

fn default_limit() -> u64 {
    50
}

fn default_timeout() -> Duration {
    Duration::from_secs(600)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakedateOptions {
    /// Records to skip in the id-ordered selection
    #[serde(default)]
    pub offset: u64,
    /// Records to process, 0 = all
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Wall-clock budget, zero = unlimited. Serialized in seconds.
    #[serde(default = "default_timeout", with = "duration_secs", rename = "timeout_secs")]
    pub timeout: Duration,
    /// Process records that already have a capture time
    #[serde(default)]
    pub force: bool,
    /// Also overwrite the upload time with the file's mtime.
    /// Rarely needed and potentially harmful: mtimes are lost by many copy tools.
    #[serde(default)]
    pub set_upload_time: bool,
}

impl Default for TakedateOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: default_limit(),
            timeout: default_timeout(),
            force: false,
            set_upload_time: false,
        }
    }
}

impl TakedateOptions {
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    fn selection(&self) -> Selection {
        Selection {
            needs_taken_at: !self.force,
        }
    }

    fn page(&self) -> Page {
        Page {
            offset: self.offset,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// The selection matched no records
    NothingToDo,
    /// Every record of the window was visited
    Completed,
    /// The time budget ran out before the window was done
    TimedOut,
}

impl JobStatus {
    /// Process exit code. 1 is left for job-level errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            JobStatus::Completed => 0,
            JobStatus::NothingToDo => 2,
            JobStatus::TimedOut => 3,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::NothingToDo => "nothing to do",
            JobStatus::Completed => "completed",
            JobStatus::TimedOut => "timed out",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TakenAtCheck {
    UpToDate,
    Set(TakenAt),
    /// No capture time in the file; carries the extraction error, if any
    NotFound(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadTimeCheck {
    UpToDate,
    Set(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    UpToDate,
    Updated,
    NoCaptureTime,
    ResourceUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordReport {
    pub id: u64,
    pub title: String,
    pub outcome: RecordOutcome,
    pub taken_at: Option<TakenAtCheck>,
    pub upload_time: Option<UploadTimeCheck>,
}

impl RecordReport {
    fn unavailable(record: &MediaRecord, reason: String) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            outcome: RecordOutcome::ResourceUnavailable(reason),
            taken_at: None,
            upload_time: None,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self.taken_at, Some(TakenAtCheck::Set(_)))
            || matches!(self.upload_time, Some(UploadTimeCheck::Set(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum JobEvent {
    Started { matched: u64, batch_size: u64 },
    Record(RecordReport),
    /// Emitted after each record
    Advance { current: u64, total: u64 },
    Finished(JobStatus),
}

/// Observer of job progress. The job never depends on what a sink does.
pub type EventSink<'a> = dyn Fn(&JobEvent) + 'a;

/// Drops every event.
pub fn null_sink(_: &JobEvent) {}

/// Forwards record outcomes to `tracing`.
pub fn log_sink(event: &JobEvent) {
    match event {
        JobEvent::Started { matched, batch_size } => {
            tracing::info!(matched, batch_size, "Reconciling capture times");
        }
        JobEvent::Record(report) => {
            let prefix = format!("Photo \"{}\" (ID={})", report.title, report.id);
            match &report.taken_at {
                Some(TakenAtCheck::UpToDate) => tracing::info!("{prefix}: Takestamp up-to-date."),
                Some(TakenAtCheck::Set(t)) => tracing::info!("{prefix}: Takestamp set to {t}."),
                Some(TakenAtCheck::NotFound(reason)) => tracing::warn!(
                    reason = reason.as_deref().unwrap_or("no date tags"),
                    "{prefix}: Failed to extract takestamp data from media file."
                ),
                None => {}
            }
            match &report.upload_time {
                Some(UploadTimeCheck::UpToDate) => {
                    tracing::info!("{prefix}: Upload time up-to-date.")
                }
                Some(UploadTimeCheck::Set(t)) => tracing::info!(
                    "{prefix}: Upload time set to {}.",
                    t.format("%Y-%m-%d at %H:%M:%S (UTC)")
                ),
                None => {}
            }
            if let RecordOutcome::ResourceUnavailable(reason) = &report.outcome {
                tracing::warn!("{prefix}: Media file unavailable: {reason}");
            }
        }
        JobEvent::Advance { .. } => {}
        JobEvent::Finished(status) => {
            tracing::info!(%status, "Capture time reconciliation finished")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub status: JobStatus,
    /// Size of the whole selection, before offset/limit
    pub matched: u64,
    /// Records in the loaded window
    pub batch_size: u64,
    pub processed: u64,
    pub updated: u64,
    pub up_to_date: u64,
    pub warned: u64,
    pub failed: u64,
    pub elapsed: Duration,
}

impl JobReport {
    fn new(matched: u64, batch_size: u64) -> Self {
        Self {
            status: JobStatus::Completed,
            matched,
            batch_size,
            processed: 0,
            updated: 0,
            up_to_date: 0,
            warned: 0,
            failed: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn tally(&mut self, record: &RecordReport) {
        self.processed += 1;
        if record.changed() {
            self.updated += 1;
        }
        if matches!(record.taken_at, Some(TakenAtCheck::NotFound(_))) {
            self.warned += 1;
        }
        match record.outcome {
            RecordOutcome::UpToDate => self.up_to_date += 1,
            RecordOutcome::ResourceUnavailable(_) => self.failed += 1,
            RecordOutcome::Updated | RecordOutcome::NoCaptureTime => {}
        }
    }
}

/// Run the job over the window selected by `options`.
pub fn run<R, F, E>(
    repo: &mut R,
    resolver: &F,
    extractor: &E,
    options: &TakedateOptions,
    sink: &EventSink<'_>,
) -> anyhow::Result<JobReport>
where
    R: MediaRepository + ?Sized,
    F: FileResolver + ?Sized,
    E: MetadataExtractor + ?Sized,
{
    let started = Instant::now();
    let selection = options.selection();

    // Count the whole selection first; the page only narrows what is loaded.
    let matched = repo.count(&selection).context("counting media records")?;
    if matched == 0 {
        tracing::info!("No media records require takedate updates");
        let mut report = JobReport::new(0, 0);
        report.status = JobStatus::NothingToDo;
        report.elapsed = started.elapsed();
        sink(&JobEvent::Finished(report.status));
        return Ok(report);
    }

    let batch = repo
        .find_matching(&selection, options.page())
        .context("loading media records")?;
    let total = batch.len() as u64;
    let mut report = JobReport::new(matched, total);
    sink(&JobEvent::Started {
        matched,
        batch_size: total,
    });

    for (i, mut record) in batch.into_iter().enumerate() {
        if !options.timeout.is_zero() && started.elapsed() >= options.timeout {
            tracing::warn!(
                processed = report.processed,
                remaining = total - report.processed,
                "Time budget of {}s exhausted",
                options.timeout.as_secs_f64()
            );
            report.status = JobStatus::TimedOut;
            break;
        }

        let outcome = reconcile(&mut record, resolver, extractor, options.set_upload_time);
        if outcome.changed() {
            repo.save(&record)
                .with_context(|| format!("saving media record {}", record.id))?;
        }
        tracing::debug!(id = record.id, outcome = ?outcome.outcome, "record reconciled");

        report.tally(&outcome);
        sink(&JobEvent::Record(outcome));
        sink(&JobEvent::Advance {
            current: i as u64 + 1,
            total,
        });
    }

    report.elapsed = started.elapsed();
    sink(&JobEvent::Finished(report.status));
    Ok(report)
}

/// Bring one record in line with its file. Mutates `record` in memory only.
fn reconcile<F, E>(
    record: &mut MediaRecord,
    resolver: &F,
    extractor: &E,
    set_upload_time: bool,
) -> RecordReport
where
    F: FileResolver + ?Sized,
    E: MetadataExtractor + ?Sized,
{
    let local = match resolver.resolve(record) {
        Ok(local) => local,
        Err(e) => return RecordReport::unavailable(record, e.to_string()),
    };

    let taken_at = match extractor.extract(&local.path, local.modified) {
        Ok(meta) => {
            tracing::trace!(
                id = record.id,
                make = ?meta.make,
                model = ?meta.model,
                "metadata extracted"
            );
            match meta.taken_at {
                Some(extracted) => {
                    if record.taken_at.as_ref().is_some_and(|stored| stored.same_as(&extracted)) {
                        TakenAtCheck::UpToDate
                    } else {
                        record.taken_at = Some(extracted.clone());
                        TakenAtCheck::Set(extracted)
                    }
                }
                None => TakenAtCheck::NotFound(None),
            }
        }
        Err(e) => TakenAtCheck::NotFound(Some(e.to_string())),
    };

    let upload_time = set_upload_time.then(|| {
        let mtime = local.modified.timestamp();
        if mtime == record.created_at.timestamp() {
            UploadTimeCheck::UpToDate
        } else {
            let created_at = DateTime::from_timestamp(mtime, 0).unwrap_or(local.modified);
            record.created_at = created_at;
            UploadTimeCheck::Set(created_at)
        }
    });

    let mut report = RecordReport {
        id: record.id,
        title: record.title.clone(),
        outcome: RecordOutcome::UpToDate,
        taken_at: Some(taken_at),
        upload_time,
    };
    report.outcome = if report.changed() {
        RecordOutcome::Updated
    } else if matches!(report.taken_at, Some(TakenAtCheck::NotFound(_))) {
        RecordOutcome::NoCaptureTime
    } else {
        RecordOutcome::UpToDate
    };
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractError, ExtractedMetadata};
    use crate::repository::InMemoryRepository;
    use crate::resolve::{LocalFile, ResolveError};
    use chrono::{FixedOffset, TimeZone};
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};

    fn mtime() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, 1, 8, 0, 0).unwrap()
    }

    fn scenario_time() -> TakenAt {
        TakenAt::utc(Utc.with_ymd_and_hms(2022, 1, 31, 19, 50, 0).unwrap())
    }

    fn file_of(id: u64) -> PathBuf {
        PathBuf::from(format!("/library/original/{id}.jpg"))
    }

    #[derive(Default)]
    struct FakeResolver {
        missing: HashSet<u64>,
    }

    impl FileResolver for FakeResolver {
        fn resolve(&self, record: &MediaRecord) -> Result<LocalFile, ResolveError> {
            if self.missing.contains(&record.id) {
                return Err(ResolveError::Missing(file_of(record.id)));
            }
            Ok(LocalFile {
                path: file_of(record.id),
                modified: mtime(),
                len: 1,
            })
        }
    }

    /// Returns `default` for every file unless overridden per path.
    struct FakeExtractor {
        default: Option<TakenAt>,
        per_file: HashMap<PathBuf, Option<TakenAt>>,
        failing: HashSet<PathBuf>,
        delay: Duration,
        calls: Cell<u64>,
        fallbacks: RefCell<Vec<DateTime<Utc>>>,
    }

    impl FakeExtractor {
        fn returning(default: Option<TakenAt>) -> Self {
            Self {
                default,
                per_file: HashMap::new(),
                failing: HashSet::new(),
                delay: Duration::ZERO,
                calls: Cell::new(0),
                fallbacks: RefCell::new(Vec::new()),
            }
        }
    }

    impl MetadataExtractor for FakeExtractor {
        fn extract(
            &self,
            path: &Path,
            fallback: DateTime<Utc>,
        ) -> Result<ExtractedMetadata, ExtractError> {
            self.calls.set(self.calls.get() + 1);
            self.fallbacks.borrow_mut().push(fallback);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if self.failing.contains(path) {
                return Err(ExtractError::Invalid {
                    path: path.to_path_buf(),
                    reason: "truncated".to_string(),
                });
            }
            let taken_at = self.per_file.get(path).cloned().unwrap_or_else(|| self.default.clone());
            Ok(ExtractedMetadata {
                taken_at,
                ..Default::default()
            })
        }
    }

    fn library(n: u64) -> InMemoryRepository {
        (1..=n)
            .map(|id| {
                MediaRecord::new(id, format!("photo {id}"), mtime())
                    .with_original(format!("{id}.jpg"))
            })
            .collect()
    }

    fn run_quiet(
        repo: &mut InMemoryRepository,
        extractor: &FakeExtractor,
        options: &TakedateOptions,
    ) -> JobReport {
        run(repo, &FakeResolver::default(), extractor, options, &null_sink).unwrap()
    }

    fn unbounded() -> TakedateOptions {
        TakedateOptions {
            limit: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_scenario_missing_takestamp_is_set() {
        let mut repo = library(1);
        let extractor = FakeExtractor::returning(Some(scenario_time()));
        let events = RefCell::new(Vec::new());
        let sink = |e: &JobEvent| events.borrow_mut().push(e.clone());

        let options = TakedateOptions::default();
        let report = run(&mut repo, &FakeResolver::default(), &extractor, &options, &sink).unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.processed, 1);
        assert_eq!(report.updated, 1);
        assert!(repo.get(1).unwrap().taken_at.as_ref().unwrap().same_as(&scenario_time()));
        assert_eq!(extractor.fallbacks.borrow().as_slice(), &[mtime()]);

        let events = events.into_inner();
        assert_eq!(events.first(), Some(&JobEvent::Started { matched: 1, batch_size: 1 }));
        assert!(events.iter().any(|e| matches!(
            e,
            JobEvent::Record(RecordReport { outcome: RecordOutcome::Updated, .. })
        )));
        assert!(events.contains(&JobEvent::Advance { current: 1, total: 1 }));
        assert_eq!(events.last(), Some(&JobEvent::Finished(JobStatus::Completed)));
    }

    #[test]
    fn test_same_instant_other_zone_counts_as_change() {
        let cet = FixedOffset::east_opt(3600).unwrap();
        let berlin = cet.with_ymd_and_hms(2022, 1, 31, 20, 50, 0).unwrap();
        let stored = TakenAt::new(berlin, "Europe/Berlin");
        let mut repo = library(1);
        let record = repo.get(1).unwrap().clone().with_taken_at(stored);
        repo.insert(record);

        let extractor = FakeExtractor::returning(Some(scenario_time()));
        let options = TakedateOptions { force: true, ..Default::default() };
        let report = run_quiet(&mut repo, &extractor, &options);

        assert_eq!(report.updated, 1);
        assert_eq!(repo.saves(), 1);
        assert_eq!(repo.get(1).unwrap().taken_at.as_ref().unwrap().timezone, "UTC");
    }

    #[test]
    fn test_second_forced_run_writes_nothing() {
        let mut repo = library(5);
        let extractor = FakeExtractor::returning(Some(scenario_time()));
        let options = TakedateOptions {
            force: true,
            set_upload_time: true,
            ..unbounded()
        };

        let first = run_quiet(&mut repo, &extractor, &options);
        assert_eq!(first.updated, 5);
        let saves = repo.saves();

        let second = run_quiet(&mut repo, &extractor, &options);
        assert_eq!(second.status, JobStatus::Completed);
        assert_eq!(second.updated, 0);
        assert_eq!(second.up_to_date, 5);
        assert_eq!(repo.saves(), saves);
    }

    #[test]
    fn test_second_unforced_run_has_nothing_to_do() {
        let mut repo = library(3);
        let extractor = FakeExtractor::returning(Some(scenario_time()));
        run_quiet(&mut repo, &extractor, &unbounded());

        let report = run_quiet(&mut repo, &extractor, &unbounded());
        assert_eq!(report.status, JobStatus::NothingToDo);
        assert_eq!(report.processed, 0);
        assert_eq!(report.status.exit_code(), 2);
    }

    #[test]
    fn test_count_before_paginate() {
        let mut repo = library(120);
        let extractor = FakeExtractor::returning(Some(scenario_time()));
        let options = TakedateOptions {
            offset: 100,
            limit: 50,
            ..Default::default()
        };

        let report = run_quiet(&mut repo, &extractor, &options);
        assert_eq!(report.matched, 120);
        assert_eq!(report.batch_size, 20);
        assert_eq!(report.processed, 20);
        assert!(repo.get(100).unwrap().taken_at.is_none());
        assert!(repo.get(101).unwrap().taken_at.is_some());
    }

    #[test]
    fn test_offset_past_selection_completes_empty() {
        let mut repo = library(3);
        let extractor = FakeExtractor::returning(Some(scenario_time()));
        let options = TakedateOptions {
            offset: 10,
            ..Default::default()
        };

        let report = run_quiet(&mut repo, &extractor, &options);
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.matched, 3);
        assert_eq!(report.processed, 0);
    }

    #[test]
    fn test_empty_library_is_nothing_to_do() {
        let mut repo = InMemoryRepository::new();
        let extractor = FakeExtractor::returning(None);
        let report = run_quiet(&mut repo, &extractor, &TakedateOptions::default());
        assert_eq!(report.status, JobStatus::NothingToDo);
        assert_eq!(extractor.calls.get(), 0);
    }

    #[test]
    fn test_timeout_stops_between_records_and_keeps_updates() {
        let mut repo = library(10);
        let mut extractor = FakeExtractor::returning(Some(scenario_time()));
        extractor.delay = Duration::from_millis(40);
        let options = TakedateOptions {
            timeout: Duration::from_millis(100),
            ..unbounded()
        };

        let report = run_quiet(&mut repo, &extractor, &options);
        assert_eq!(report.status, JobStatus::TimedOut);
        assert!(report.processed >= 1);
        assert!(report.processed < 10);
        assert_eq!(repo.saves(), report.processed);
        assert_eq!(extractor.calls.get(), report.processed);
        let selection = Selection { needs_taken_at: true };
        assert_eq!(repo.count(&selection).unwrap(), 10 - report.processed);
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let mut repo = library(6);
        let mut extractor = FakeExtractor::returning(Some(scenario_time()));
        extractor.delay = Duration::from_millis(5);
        let options = TakedateOptions {
            timeout: Duration::ZERO,
            ..unbounded()
        };

        let report = run_quiet(&mut repo, &extractor, &options);
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.processed, 6);
        assert_eq!(report.updated, 6);
        assert_eq!(extractor.calls.get(), 6);
    }

    #[test]
    fn test_failures_do_not_abort_batch() {
        let mut repo = library(4);
        let resolver = FakeResolver {
            missing: HashSet::from([2]),
        };
        let mut extractor = FakeExtractor::returning(Some(scenario_time()));
        extractor.per_file.insert(file_of(3), None);
        extractor.failing.insert(file_of(4));

        let report = run(&mut repo, &resolver, &extractor, &unbounded(), &null_sink).unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.processed, 4);
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.warned, 2);
        assert_eq!(repo.saves(), 1);
        assert!(repo.get(3).unwrap().taken_at.is_none());
        assert!(repo.get(4).unwrap().taken_at.is_none());
    }

    #[test]
    fn test_upload_time_only_with_opt_in() {
        let old_upload = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut repo: InMemoryRepository =
            [MediaRecord::new(1, "a", old_upload).with_original("1.jpg")].into_iter().collect();
        let extractor = FakeExtractor::returning(None);

        let report = run_quiet(&mut repo, &extractor, &TakedateOptions::default());
        assert_eq!(report.updated, 0);
        assert_eq!(repo.get(1).unwrap().created_at, old_upload);

        let options = TakedateOptions {
            set_upload_time: true,
            ..Default::default()
        };
        let report = run_quiet(&mut repo, &extractor, &options);
        assert_eq!(report.updated, 1);
        assert_eq!(report.warned, 1);
        assert_eq!(repo.get(1).unwrap().created_at, mtime());
    }

    #[test]
    fn test_sink_does_not_change_result() {
        let extractor = FakeExtractor::returning(Some(scenario_time()));

        let mut quiet = library(3);
        let a = run_quiet(&mut quiet, &extractor, &unbounded());
        let mut logged = library(3);
        let b = run(&mut logged, &FakeResolver::default(), &extractor, &unbounded(), &log_sink)
            .unwrap();

        assert_eq!((a.status, a.processed, a.updated), (b.status, b.processed, b.updated));
        assert_eq!(quiet.get(2), logged.get(2));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: TakedateOptions =
            serde_json::from_str(r#"{"timeout_secs": 0, "force": true}"#).unwrap();
        assert_eq!(options.limit, 50);
        assert!(options.timeout.is_zero());
        assert!(options.force);
        assert!(!options.set_upload_time);
    }
}

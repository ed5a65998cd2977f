use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pixvault_core::{
    checksum_file, import_file, reconcile_library, JobEvent, JobStatus, LibraryConfig,
    RecordOutcome, RecordReport, TakedateOptions, TakenAtCheck, UploadTimeCheck,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pixvault", version, about = "Self-hosted photo library maintenance")]
struct Cli {
    /// Library config file (default: ./pixvault.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Library root directory, overrides the config file
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Arguments left out fall back to the `takedate` section of the config file.
#[derive(Args)]
struct TakedateArgs {
    /// Offset of the first photo to process [default: 0]
    offset: Option<u64>,

    /// Number of photos to process, 0 means process all [default: 50]
    limit: Option<u64>,

    /// Maximum execution time in seconds, 0 means unlimited [default: 600]
    time: Option<u64>,

    /// Additionally set the upload time from the media file's modification time.
    /// ATTENTION: rarely needed and potentially harmful
    #[arg(short = 'c', long)]
    set_upload_time: bool,

    /// Process all media files, not only those without a takedate
    #[arg(short, long)]
    force: bool,
}

impl TakedateArgs {
    fn options(&self, configured: &TakedateOptions) -> TakedateOptions {
        let mut options = TakedateOptions {
            offset: self.offset.unwrap_or(configured.offset),
            limit: self.limit.unwrap_or(configured.limit),
            force: self.force || configured.force,
            set_upload_time: self.set_upload_time || configured.set_upload_time,
            ..configured.clone()
        };
        if let Some(secs) = self.time {
            options = options.with_timeout_secs(secs);
        }
        options
    }
}

#[derive(Subcommand)]
enum Command {
    /// Update missing takedate entries from exif data
    Takedate(TakedateArgs),

    /// Copy a file into the library, printing its size and checksum
    Import {
        source: PathBuf,
        /// Destination, relative to the library root
        dest: PathBuf,
    },

    /// Print size and checksum of files
    Checksum {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = LibraryConfig::load_or_default(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.root = root;
    }
    config.validate()?;

    match cli.command {
        Command::Takedate(args) => takedate(&config, &args.options(&config.takedate)),
        Command::Import { source, dest } => {
            let dest = config.root.join(dest);
            let imported = import_file(&source, &dest, config.digest_algorithm()?)?;
            println!("{}  {}  {}", imported.checksum, imported.bytes, imported.path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Checksum { files } => {
            let algorithm = config.digest_algorithm()?;
            for file in files {
                let stat = checksum_file(&file, algorithm)?;
                println!(
                    "{}  {}  {}",
                    stat.checksum.unwrap_or_default(),
                    stat.bytes,
                    file.display()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn takedate(config: &LibraryConfig, options: &TakedateOptions) -> anyhow::Result<ExitCode> {
    let t_total = std::time::Instant::now();
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("Photo {pos}/{len} [{bar:40}] {percent:>3}%")?
            .progress_chars("=> "),
    );

    // Messages go above the bar so it stays at the bottom.
    let sink = |event: &JobEvent| match event {
        JobEvent::Started { batch_size, .. } => bar.set_length(*batch_size),
        JobEvent::Record(report) => {
            for line in describe(report) {
                bar.println(line);
            }
        }
        JobEvent::Advance { current, .. } => bar.set_position(*current),
        JobEvent::Finished(_) => bar.finish_and_clear(),
    };

    let report = reconcile_library(config, options, &sink)?;
    tracing::info!(status = %report.status, processed = report.processed, "takedate finished");

    match report.status {
        JobStatus::NothingToDo => eprintln!("No pictures require takedate updates."),
        status => eprintln!(
            "Takedate {}: {} of {} photos processed, {} updated, {} up-to-date, \
             {} warnings, {} unavailable ({:.2}s)",
            status,
            report.processed,
            report.matched,
            report.updated,
            report.up_to_date,
            report.warned,
            report.failed,
            t_total.elapsed().as_secs_f64()
        ),
    }

    Ok(ExitCode::from(report.status.exit_code() as u8))
}

fn describe(report: &RecordReport) -> Vec<String> {
    let photo = format!("Photo \"{}\" (ID={})", report.title, report.id);
    let info = |msg: String| format!("Info:    {photo}: {msg}");
    let warning = |msg: String| format!("Warning: {photo}: {msg}");
    let mut lines = Vec::new();

    match &report.taken_at {
        Some(TakenAtCheck::UpToDate) => lines.push(info("Takestamp up-to-date.".into())),
        Some(TakenAtCheck::Set(t)) => lines.push(info(format!("Takestamp set to {t}."))),
        Some(TakenAtCheck::NotFound(_)) => lines.push(warning(
            "Failed to extract takestamp data from media file.".into(),
        )),
        None => {}
    }
    match &report.upload_time {
        Some(UploadTimeCheck::UpToDate) => lines.push(info("Upload time up-to-date.".into())),
        Some(UploadTimeCheck::Set(t)) => lines.push(info(format!(
            "Upload time set to {}.",
            t.format("%Y-%m-%d at %H:%M:%S (UTC)")
        ))),
        None => {}
    }
    if let RecordOutcome::ResourceUnavailable(reason) = &report.outcome {
        lines.push(warning(reason.clone()));
    }
    lines
}

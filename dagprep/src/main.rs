mod logging;
mod output;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use dagprep_core::{
    ArchiveSplitter, CdcChunker, ChunkerConfig, DEFAULT_METADATA_FILE, DEFAULT_TARGET_SIZE,
    FramePolicy, Pipeline, PipelineConfig, SplitterConfig, expand_inputs, write_metadata,
};
use logging::LogFormat;
use output::{OutputWriter, PrepOutput, SplitOutput, archive_infos, archive_lines};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// dagprep - Prepare file trees as content-addressed DAG archives
#[derive(Parser)]
#[command(name = "dagprep")]
#[command(about = "Build a directory DAG from files and split it into archives", long_about = None)]
#[command(version)]
struct Cli {
    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every command that writes archives.
#[derive(Args, Debug)]
struct ArchiveArgs {
    /// Metadata file name
    #[arg(short, long, default_value = DEFAULT_METADATA_FILE)]
    metadata: PathBuf,

    /// Dry run: do not write archives to disk (but still write metadata)
    #[arg(short, long)]
    dry_run: bool,

    /// Directory archives are written to (defaults to DAGPREP_OUT_DIR env var or .)
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// End to end data prep: chunk files, build the directory DAG, split into archives
    #[command(visible_alias = "dp")]
    Prep {
        /// Files or directories to prepare
        paths: Vec<PathBuf>,

        /// Output filename prefix for archive files (a dash is appended)
        #[arg(short, long, default_value = "")]
        output: String,

        /// Target size in bytes to split archives to
        #[arg(short, long, default_value_t = DEFAULT_TARGET_SIZE)]
        size: u64,

        #[command(flatten)]
        archive: ArchiveArgs,

        /// Abort on the first directory frame that cannot be written
        #[arg(long)]
        fail_fast_frames: bool,

        /// Fail a stage that waits longer than this many seconds for its upstream
        #[arg(long)]
        stall_timeout: Option<u64>,

        /// Minimum chunk size in bytes
        #[arg(long, default_value_t = ChunkerConfig::default().min_size)]
        min_chunk: u32,

        /// Average chunk size in bytes
        #[arg(long, default_value_t = ChunkerConfig::default().avg_size)]
        avg_chunk: u32,

        /// Maximum chunk size in bytes
        #[arg(long, default_value_t = ChunkerConfig::default().max_size)]
        max_chunk: u32,
    },

    /// Split an existing archive into size-bounded archives
    #[command(visible_alias = "sac")]
    Split {
        /// Archive to split (reads stdin when omitted)
        input: Option<PathBuf>,

        /// Output filename prefix for archive files (a dash is appended)
        #[arg(short, long)]
        output: String,

        /// Target size in bytes to split archives to
        #[arg(short, long)]
        size: u64,

        #[command(flatten)]
        archive: ArchiveArgs,
    },
}

fn main() {
    let cli = Cli::parse();
    let output = OutputWriter::new(cli.json);

    if let Err(e) = logging::init_logging(cli.verbose, cli.log_format) {
        output.write_error(&e, 1);
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Prep {
            paths,
            output: prefix,
            size,
            archive,
            fail_fast_frames,
            stall_timeout,
            min_chunk,
            avg_chunk,
            max_chunk,
        } => {
            let chunker = ChunkerConfig {
                min_size: min_chunk,
                avg_size: avg_chunk,
                max_size: max_chunk,
            };
            let pipeline = PipelineConfig {
                stall_timeout: stall_timeout.map(Duration::from_secs),
                frame_policy: if fail_fast_frames {
                    FramePolicy::FailFast
                } else {
                    FramePolicy::BestEffort
                },
            };
            archive.splitter_config(prefix, size).and_then(|splitter| {
                cmd_prep(&output, paths, splitter, &archive.metadata, chunker, pipeline)
            })
        }
        Commands::Split {
            input,
            output: prefix,
            size,
            archive,
        } => archive
            .splitter_config(prefix, size)
            .and_then(|splitter| cmd_split(&output, input, splitter, &archive.metadata)),
    };

    if let Err(e) = result {
        output.write_error(&e, 1);
        std::process::exit(1);
    }
}

impl ArchiveArgs {
    fn splitter_config(&self, prefix: String, size: u64) -> Result<SplitterConfig> {
        if size == 0 {
            bail!("Target size must be greater than zero");
        }

        // Determine output directory: CLI arg > DAGPREP_OUT_DIR env var > . default
        let out_dir = self
            .out_dir
            .clone()
            .or_else(|| std::env::var("DAGPREP_OUT_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));

        // Archive names read `{prefix}-{digest}.car` when a prefix is given.
        let prefix = if prefix.is_empty() {
            prefix
        } else {
            format!("{}-", prefix)
        };

        Ok(SplitterConfig {
            target_size: size,
            prefix,
            out_dir,
            dry_run: self.dry_run,
        })
    }
}

fn cmd_prep(
    output: &OutputWriter,
    paths: Vec<PathBuf>,
    splitter_config: SplitterConfig,
    metadata_path: &Path,
    chunker_config: ChunkerConfig,
    pipeline_config: PipelineConfig,
) -> Result<()> {
    let mut chunker = CdcChunker::new(chunker_config).context("Invalid chunk sizes")?;

    let inputs = expand_inputs(&paths).context("Failed to read inputs")?;
    info!(
        files = inputs.units.len(),
        bytes = inputs.total_bytes(),
        "Preparing inputs"
    );

    let mut splitter = ArchiveSplitter::new(splitter_config);
    let outcome = Pipeline::new(pipeline_config)
        .run(&inputs, &mut chunker, &mut splitter)
        .context("Data prep failed")?;

    let metadata = write_metadata(metadata_path, Some(&outcome.root_cid), &outcome.report)
        .with_context(|| format!("Failed to write metadata {}", metadata_path.display()))?;

    let data = PrepOutput::new(
        outcome.root_cid.clone(),
        outcome.files,
        outcome.directories,
        outcome.emit,
        &outcome.report,
        metadata,
    );

    output.write(&data, || {
        let mut text = archive_lines(&data.archives, data.dry_run);
        if data.frames_failed > 0 {
            text.push_str(&format!(
                "warning: {} directory frames could not be written\n",
                data.frames_failed
            ));
        }
        text.push_str(&format!("root cid = {}\n", data.root_cid));
        text
    })?;

    Ok(())
}

fn cmd_split(
    output: &OutputWriter,
    input: Option<PathBuf>,
    config: SplitterConfig,
    metadata_path: &Path,
) -> Result<()> {
    let mut reader = open_input(input)?;

    let mut splitter = ArchiveSplitter::new(config);
    let report = splitter
        .split_existing(&mut reader)
        .context("Failed to split archive")?;
    debug!(archives = report.archives.len(), "Split archive");

    let metadata = write_metadata(metadata_path, None, &report)
        .with_context(|| format!("Failed to write metadata {}", metadata_path.display()))?;

    let data = SplitOutput {
        success: true,
        result_code: 0,
        frames: report.frames,
        dry_run: report.dry_run,
        archives: archive_infos(&report),
        metadata,
    };

    output.write(&data, || archive_lines(&data.archives, data.dry_run))?;

    Ok(())
}

/// Open the archive to split: the given file, or stdin when it is piped.
fn open_input(input: Option<PathBuf>) -> Result<Box<dyn Read>> {
    match input {
        Some(path) => {
            let file = File::open(&path)
                .with_context(|| format!("Failed to open archive: {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => {
            if atty::is(atty::Stream::Stdin) {
                bail!("No input archive given and stdin is a terminal; pass a file or pipe one in");
            }
            Ok(Box::new(BufReader::new(io::stdin())))
        }
    }
}

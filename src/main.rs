use clap::{Args, Parser, Subcommand, ValueEnum};
use fdrscan::completion_tracker::{read_checkpoint, CompletionTracker};
use fdrscan::config::{QValueMethod, TabulateConfig, TrackerConfig};
use fdrscan::tabulate::{self, TabulateOutcome};
use fdrscan::{AuditMode, FdrAggregator, RangeCollection, ScanError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Exit code when tabulation stopped on missing rows and wrote a skip file
const INCOMPLETE_EXIT: u8 = 2;

#[derive(Parser)]
#[command(name = "fdrscan")]
#[command(about = "Completion tracking and FDR tabulation for batched statistical scans", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tabulate q-values over result files, or write a skip file if rows are missing
    Tabulate(TabulateArgs),
    /// Append matching result files into one table and delete them
    Merge {
        #[arg(long, default_value = ".")]
        input_dir: PathBuf,
        /// Glob pattern, may be '+'-joined; repeatable
        #[arg(long = "pattern", required = true)]
        patterns: Vec<String>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Merge, then tabulate the merged file; missing rows go to the skip file
    MergeTabulate {
        #[command(flatten)]
        tabulate: TabulateArgs,
        #[arg(long)]
        merged: PathBuf,
        #[arg(long)]
        skip: PathBuf,
    },
    /// Record completed work items in a shared checkpoint
    CheckpointAdd {
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Batch name used under FDRSCAN_STATE_DIR when --checkpoint is absent
        #[arg(long)]
        batch: Option<String>,
        /// Batch size N
        #[arg(long)]
        count: u64,
        /// Range text such as 0-99,150
        items: String,
    },
    /// Show what a shared checkpoint holds
    CheckpointStatus {
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        #[arg(long)]
        batch: Option<String>,
        #[arg(long)]
        count: u64,
    },
}

#[derive(Args)]
struct TabulateArgs {
    /// JSON file with a full tabulation config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    input_dir: Option<PathBuf>,
    #[arg(long = "pattern")]
    patterns: Vec<String>,
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    keep_test: Option<String>,
    /// Split keep-test; repeatable, in priority order
    #[arg(long = "split")]
    splits: Vec<String>,
    #[arg(long)]
    max_p_value: Option<f64>,
    #[arg(long, value_enum)]
    audit: Option<AuditArg>,
    #[arg(long, value_enum)]
    method: Option<MethodArg>,
    #[arg(long)]
    num_tests_override: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum AuditArg {
    Off,
    Strict,
    Relaxed,
}

impl From<AuditArg> for AuditMode {
    fn from(arg: AuditArg) -> Self {
        match arg {
            AuditArg::Off => AuditMode::Off,
            AuditArg::Strict => AuditMode::Strict,
            AuditArg::Relaxed => AuditMode::Relaxed,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    StoreyTibshirani,
    Randomization,
    LocalRandomization,
}

impl From<MethodArg> for QValueMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::StoreyTibshirani => QValueMethod::StoreyTibshirani,
            MethodArg::Randomization => QValueMethod::Randomization,
            MethodArg::LocalRandomization => QValueMethod::LocalRandomization,
        }
    }
}

impl TabulateArgs {
    fn into_config(self) -> Result<TabulateConfig, ScanError> {
        let mut config = match &self.config {
            Some(path) => TabulateConfig::from_json_file(path)?,
            None => TabulateConfig::default(),
        };
        if let Some(input_dir) = self.input_dir {
            config.input_dir = input_dir;
        }
        if !self.patterns.is_empty() {
            config.patterns = self.patterns;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(keep_test) = self.keep_test {
            config.keep_test = keep_test;
        }
        if !self.splits.is_empty() {
            config.split_keep_tests = self.splits;
        }
        if let Some(max_p_value) = self.max_p_value {
            config.max_p_value = max_p_value;
        }
        if let Some(audit) = self.audit {
            config.audit = audit.into();
        }
        if let Some(method) = self.method {
            config.method = method.into();
        }
        if self.num_tests_override.is_some() {
            config.num_tests_override = self.num_tests_override;
        }
        Ok(config)
    }
}

fn tracker_config(checkpoint: Option<PathBuf>, batch: Option<String>, count: u64) -> Result<TrackerConfig, ScanError> {
    match (checkpoint, batch) {
        (Some(path), _) => Ok(TrackerConfig::new(path, count)),
        (None, Some(batch)) => Ok(TrackerConfig::in_state_dir(&batch, count)),
        (None, None) => Err(ScanError::Config("either --checkpoint or --batch is required".into())),
    }
}

fn main() -> Result<ExitCode, ScanError> {
    fdrscan::init_tracing("fdrscan");
    let cli = Cli::parse();

    match cli.command {
        Commands::Tabulate(args) => {
            let config = args.into_config()?;
            let mut aggregator = FdrAggregator::new(config)?;
            match aggregator.create_tabulate_report()? {
                TabulateOutcome::Complete { rows_written, randomization_runs } => {
                    println!(
                        "[fdrscan] Wrote {} rows ({} randomization runs) to {}",
                        rows_written,
                        randomization_runs,
                        aggregator.config().output.display()
                    );
                }
                TabulateOutcome::Incomplete { pattern, skip } => {
                    println!("[fdrscan] {} is incomplete; missing rows: {}", pattern, skip);
                    return Ok(ExitCode::from(INCOMPLETE_EXIT));
                }
            }
        }
        Commands::Merge { input_dir, patterns, output } => {
            let summary = tabulate::merge_files(&input_dir, &patterns, &output)?;
            println!(
                "[fdrscan] Merged {} files ({} rows) into {}",
                summary.files_merged,
                summary.rows_written,
                output.display()
            );
        }
        Commands::MergeTabulate { tabulate: args, merged, skip } => {
            let template = args.into_config()?;
            template.validate()?;
            let [pattern] = template.patterns.as_slice() else {
                return Err(ScanError::Config("merge-tabulate takes exactly one --pattern".into()));
            };
            let done = tabulate::merge_then_tabulate_or_create_skip_file(
                &template.input_dir,
                pattern,
                &merged,
                &template.output,
                &skip,
                &template,
            )?;
            if !done {
                println!("[fdrscan] Missing rows written to {}", skip.display());
                return Ok(ExitCode::from(INCOMPLETE_EXIT));
            }
            println!("[fdrscan] Report written to {}", template.output.display());
        }
        Commands::CheckpointAdd { checkpoint, batch, count, items } => {
            let config = tracker_config(checkpoint, batch, count)?;
            let items: RangeCollection = items.parse()?;
            let tracker = CompletionTracker::with_config(config)?;
            tracker.add_range_collection(&items)?;
            if tracker.range_completed_by_this_process()? {
                info!("[fdrscan] This process completed the batch");
                println!("completed");
            }
            tracker.close()?;
        }
        Commands::CheckpointStatus { checkpoint, batch, count } => {
            let config = tracker_config(checkpoint, batch, count)?;
            let done = read_checkpoint(&config.checkpoint_path)?;
            let missing = if count == 0 {
                RangeCollection::new()
            } else {
                done.complement(0, count - 1)
            };
            println!("checkpoint: {}", config.checkpoint_path.display());
            println!("completed:  {} of {} ({})", done.count(), count, done);
            println!("missing:    {}", missing);
            println!("complete:   {}", done.is_complete(count));
        }
    }

    Ok(ExitCode::SUCCESS)
}

//! Command-line entry point for gridsynth.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use gridsynth::check::check_solution;
use gridsynth::core::prompt::PromptComposer;
use gridsynth::core::task::TaskId;
use gridsynth::exit_codes;
use gridsynth::io::config::{DEFAULT_CONFIG_FILE, SynthConfig, load_config};
use gridsynth::io::generation::{ChatCompletionsGenerator, GenerationClient};
use gridsynth::io::progress_log::{CsvProgressLog, PROGRESS_FILE, read_stats};
use gridsynth::io::sandbox::PythonSandbox;
use gridsynth::io::solution_store::DirectorySolutionStore;
use gridsynth::io::task_source::{DirectoryTaskSource, TaskSource};
use gridsynth::logging;
use gridsynth::orchestrate::AttemptOrchestrator;
use gridsynth::runner::{RunSettings, TaskReport, run_tasks};
use gridsynth::validator::AttemptValidator;

const DEFAULT_DATA_DIR: &str = "data/google-code-golf-2025";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_LOG_DIR: &str = "logs";

#[derive(Parser)]
#[command(
    name = "gridsynth",
    version,
    about = "Generate and verify grid-transformation programs with an LLM"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate, validate and save solutions for a range of tasks.
    Run(RunArgs),
    /// Validate a saved solution file against a task.
    Check {
        #[arg(long, default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,
        #[arg(long)]
        task: u32,
        /// Python source file to check.
        file: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the initial prompt for a task without calling the service.
    Prompt {
        #[arg(long, default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,
        #[arg(long)]
        task: u32,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Summarize an existing run log.
    Stats {
        #[arg(long, default_value = DEFAULT_LOG_DIR)]
        log_dir: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
    /// First task id (inclusive).
    #[arg(long, default_value_t = 1)]
    start: u32,
    /// Last task id (inclusive).
    #[arg(long, default_value_t = 10)]
    end: u32,
    /// Stop starting new tasks after this many generation calls.
    #[arg(long)]
    max_calls: Option<u64>,
    #[arg(long)]
    model: Option<String>,
    /// Retries per task after the first attempt.
    #[arg(long)]
    max_retries: Option<u32>,
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    dotenvy::dotenv().ok();
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Check {
            data_dir,
            task,
            file,
            config,
        } => cmd_check(&data_dir, task, &file, config.as_deref()),
        Command::Prompt {
            data_dir,
            task,
            config,
        } => cmd_prompt(&data_dir, task, config.as_deref()),
        Command::Stats { log_dir } => cmd_stats(&log_dir),
    }
}

/// Load the config file; an explicitly named file must exist.
fn resolve_config(path: Option<&Path>) -> Result<SynthConfig> {
    match path {
        Some(path) if !path.exists() => bail!("config file {} not found", path.display()),
        Some(path) => load_config(path),
        None => load_config(Path::new(DEFAULT_CONFIG_FILE)),
    }
}

fn sandbox(cfg: &SynthConfig) -> Result<AttemptValidator<PythonSandbox>> {
    if !PythonSandbox::interpreter_available(&cfg.sandbox.python) {
        bail!("python interpreter {:?} is not available", cfg.sandbox.python);
    }
    Ok(AttemptValidator::new(
        PythonSandbox::new(&cfg.sandbox),
        cfg.sandbox.max_source_bytes,
    ))
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let mut cfg = resolve_config(args.config.as_deref())?;
    if let Some(model) = args.model {
        cfg.generation.model = model;
    }
    if let Some(max_calls) = args.max_calls {
        cfg.run.max_api_calls = max_calls;
    }
    if let Some(max_retries) = args.max_retries {
        cfg.attempts.max_retries = max_retries;
    }
    cfg.validate()?;

    let source = DirectoryTaskSource::new(&args.data_dir, args.start, args.end)?;
    let validator = sandbox(&cfg)?;
    let generator = ChatCompletionsGenerator::from_config(&cfg.generation)?;
    let mut client = GenerationClient::new(generator, &cfg.generation);
    let composer = PromptComposer::new(
        cfg.sandbox.entry_point.clone(),
        cfg.run.eval_examples_in_prompt,
    )?;
    let mut store = DirectorySolutionStore::new(&args.output_dir, cfg.run.save_failed_attempts);
    let mut log = CsvProgressLog::open(&args.log_dir)?;

    println!("data directory: {}", args.data_dir.display());
    println!("output directory: {}", args.output_dir.display());
    println!("tasks: {} to {}", args.start, args.end);
    println!("model: {}", cfg.generation.model);
    println!("max api calls: {}", cfg.run.max_api_calls);
    info!(log = %log.path().display(), "run log opened");

    let settings = RunSettings {
        max_api_calls: cfg.run.max_api_calls,
        task_delay: cfg.run.task_delay(),
    };
    let mut orchestrator = AttemptOrchestrator::new(
        &mut client,
        &composer,
        &validator,
        cfg.attempts.max_attempts(),
    );
    let summary = run_tasks(
        &source,
        &mut orchestrator,
        &mut store,
        &mut log,
        &settings,
        print_report,
    )?;

    println!("\n{summary}");
    Ok(exit_codes::OK)
}

fn print_report(report: &TaskReport) {
    match report {
        TaskReport::Skipped(id) => println!("task {id}: already solved, skipping"),
        TaskReport::Finished(outcome) => match outcome.accepted() {
            Some(candidate) => println!(
                "task {}: accepted on attempt {} ({} bytes)",
                outcome.task_id,
                candidate.attempt,
                candidate.source.len()
            ),
            None => println!(
                "task {}: not solved after {} attempts",
                outcome.task_id,
                outcome.attempts()
            ),
        },
        TaskReport::Faulted { task_id, message } => println!("task {task_id}: error: {message}"),
    }
}

fn cmd_check(data_dir: &Path, task: u32, file: &Path, config: Option<&Path>) -> Result<i32> {
    let cfg = resolve_config(config)?;
    let id = TaskId::new(task)?;
    let source = DirectoryTaskSource::new(data_dir, task, task)?;
    let validator = sandbox(&cfg)?;

    let verdict = check_solution(&source, id, file, &validator)?;
    println!("task {id}: {}", verdict.status());
    println!("{verdict}");
    Ok(if verdict.is_accepted() {
        exit_codes::OK
    } else {
        exit_codes::FAILURE
    })
}

fn cmd_prompt(data_dir: &Path, task: u32, config: Option<&Path>) -> Result<i32> {
    let cfg = resolve_config(config)?;
    let id = TaskId::new(task)?;
    let source = DirectoryTaskSource::new(data_dir, task, task)?;
    let task = source.load(id)?;
    let composer = PromptComposer::new(
        cfg.sandbox.entry_point.clone(),
        cfg.run.eval_examples_in_prompt,
    )?;
    println!("{}", composer.compose(&task, None)?);
    Ok(exit_codes::OK)
}

fn cmd_stats(log_dir: &Path) -> Result<i32> {
    let stats = read_stats(&log_dir.join(PROGRESS_FILE))?;
    println!("{stats}");
    Ok(exit_codes::OK)
}

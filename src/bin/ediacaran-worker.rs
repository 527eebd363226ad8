use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::Verbosity;
use ediacaran::candidate::JsonCandidate;
use ediacaran::config::{WorkerConfig, WorkerConfigBuilder};
use ediacaran::process::EvalProcessDef;
use ediacaran::worker::run_worker;
use futures::channel::oneshot;
use futures::{pin_mut, select, FutureExt};
use log::info;
use parse_duration::parse::parse;
use serde::Deserialize;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Builder;

#[derive(Parser, Debug)]
#[command(version, about = "Run a remote evaluation worker", long_about = None)]
struct Args {
    #[clap(flatten)]
    verbose: Option<Verbosity>,

    /// Master address, e.g. "search-master:15000"
    #[arg(short, long)]
    master: Option<String>,

    /// Worker name reported to the master (defaults to worker-<pid>)
    #[arg(long)]
    name: Option<String>,

    /// Maximum concurrent evaluations
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Interval between connection attempts, e.g. "5s"
    #[arg(short = 'b', long)]
    retry_backoff: Option<String>,

    /// Exit when the master shuts down instead of waiting for a new one
    #[arg(long)]
    one_shot: bool,

    /// Compress the connection (requires the compression feature)
    #[arg(long)]
    compress: bool,

    #[arg(short = 'k', long)]
    kill_eval_after: Option<String>,

    #[arg(short = 'c', long)]
    config_file: Option<PathBuf>,

    eval_program: OsString,
    eval_program_args: Vec<OsString>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FileConfig {
    master: Option<String>,
    name: Option<String>,
    threads: Option<usize>,
    retry_backoff: Option<String>,
    one_shot: Option<bool>,
    compress: Option<bool>,
    local_search: Option<String>,
}

fn init_logger(args: &Args) {
    env_logger::Builder::new()
        .filter_level(
            args.verbose
                .as_ref()
                .map(|v| v.log_level_filter())
                .unwrap_or(log::LevelFilter::Error),
        )
        .format_module_path(false)
        .format_target(false)
        .init();
}

fn load_file_config(args: &Args) -> Result<FileConfig> {
    match &args.config_file {
        None => Ok(FileConfig::default()),
        Some(path) => {
            let path_display = path.display();
            info!("Reading config file: {}", path_display);
            let config_str = fs::read_to_string(path)
                .with_context(|| format!("Unable to read config file: {}", path_display))?;
            serde_yaml::from_str(&config_str)
                .with_context(|| format!("Unable to parse config file: {}", path_display))
        }
    }
}

fn parse_duration_arg(value: &Option<String>, what: &str) -> Result<Option<Duration>> {
    value
        .as_ref()
        .map(|raw| {
            parse(raw).with_context(|| format!("Unable to parse {} from value {:?}", what, raw))
        })
        .transpose()
}

fn make_worker_config(args: &Args, file: &FileConfig) -> Result<WorkerConfig> {
    let master = args
        .master
        .clone()
        .or_else(|| file.master.clone())
        .context("Master address required (--master or config file)")?;

    let name = args
        .name
        .clone()
        .or_else(|| file.name.clone())
        .unwrap_or_else(|| format!("worker-{}", std::process::id()));

    let mut builder = WorkerConfigBuilder::new(master, name);

    if let Some(threads) = args.threads.or(file.threads) {
        builder.eval_threads(threads);
    }
    let retry_backoff = args
        .retry_backoff
        .clone()
        .or_else(|| file.retry_backoff.clone());
    if let Some(backoff) = parse_duration_arg(&retry_backoff, "retry backoff")? {
        builder.retry_backoff(backoff);
    }
    if args.one_shot || file.one_shot.unwrap_or(false) {
        builder.one_shot(true);
    }
    if args.compress || file.compress.unwrap_or(false) {
        builder.compress(true);
    }
    if let Some(budget) = parse_duration_arg(&file.local_search, "local search budget")? {
        builder.local_search(budget);
    }

    builder.build().context("Invalid worker configuration")
}

fn make_eval_def(args: &Args) -> Result<EvalProcessDef> {
    let kill_after = parse_duration_arg(&args.kill_eval_after, "kill-eval-after")?;
    Ok(EvalProcessDef::new(
        args.eval_program.clone(),
        args.eval_program_args.clone(),
        kill_after,
    ))
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args);
    let file_config = load_file_config(&args)?;
    let worker_config = make_worker_config(&args, &file_config)?;
    let eval_def = make_eval_def(&args)?;

    let (signal_sender, signal_recv) = oneshot::channel::<()>();
    let signal_sender = Arc::new(Mutex::new(Some(signal_sender)));
    ctrlc::set_handler(move || {
        let mut sender = signal_sender.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = sender.take() {
            sender.send(()).ok();
        }
    })
    .context("Failed to set signal handler")?;

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Unable to start runtime")?;

    runtime.block_on(async move {
        let worker = run_worker::<JsonCandidate, _>(worker_config, Arc::new(eval_def)).fuse();
        let signal = signal_recv.fuse();
        pin_mut!(worker, signal);

        select! {
            result = worker => result.context("Worker failed")?,
            _ = signal => info!("Received signal, shutting down"),
        }
        Ok::<(), anyhow::Error>(())
    })?;

    info!("Done");
    Ok(())
}

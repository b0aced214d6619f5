use anyhow::{Context, Result};
use chunkscribe::{
    config::TranscriberConfig,
    engine::{router::EngineRouter, Engine, EngineKind, NativeEngine, RemoteEngine},
    orchestrator::Orchestrator,
    tracker::{JobEvent, JobStore, JobTracker},
};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "chunkscribe")]
#[command(about = "Chunked transcription of long audio recordings")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Audio recording to transcribe (16-bit PCM WAV)
    #[arg(required_unless_present = "check_jobs")]
    pub audio: Option<PathBuf>,

    /// Poll outstanding async jobs once and exit instead of transcribing
    #[arg(long, default_value = "false")]
    pub check_jobs: bool,

    /// Configuration file (JSON); defaults apply when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backend to use for this request, overriding the configured preference
    #[arg(long, value_enum)]
    pub engine: Option<EngineArg>,

    /// Directory for the durable async-job store
    #[arg(long, default_value = "/tmp/chunkscribe/jobs")]
    pub job_store: PathBuf,

    /// Keep the process alive until an async job completes
    #[arg(long, default_value = "false")]
    pub wait: bool,

    /// Emit the full result as JSON instead of plain text
    #[arg(long, default_value = "false")]
    pub json: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum EngineArg {
    Native,
    Remote,
}

impl From<EngineArg> for EngineKind {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Native => EngineKind::Native,
            EngineArg::Remote => EngineKind::Remote,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

fn build_orchestrator(config: TranscriberConfig, job_store: &PathBuf) -> Result<Orchestrator> {
    let native = Arc::new(Engine::Native(NativeEngine::new(config.native.clone())));
    let remote = config
        .remote
        .clone()
        .map(|remote| Arc::new(Engine::Remote(RemoteEngine::new(remote))));

    let store = JobStore::open(job_store).context("Failed to open job store")?;
    let tracker_engine = remote.as_ref().map(Arc::clone).unwrap_or_else(|| Arc::clone(&native));
    let tracker = JobTracker::new(tracker_engine, store, &config);
    let router = EngineRouter::new(native, remote);

    Ok(Orchestrator::new(config, router, tracker))
}

/// Block until the named job reaches a terminal state.
async fn wait_for_job(orchestrator: &Orchestrator, job_id: &str) -> Result<()> {
    let mut events = orchestrator.tracker().subscribe();
    loop {
        match events.recv().await.context("Job event stream closed")? {
            JobEvent::Completed { job, result } if job.job_id == job_id => {
                println!("{}", result.text);
                return Ok(());
            }
            JobEvent::Failed { job, reason } if job.job_id == job_id => {
                anyhow::bail!("Job {} failed: {}", job.job_id, reason);
            }
            JobEvent::TimedOut { job } if job.job_id == job_id => {
                anyhow::bail!("Job {} abandoned after waiting too long", job.job_id);
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level: tracing::Level = args.log_level.into();
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    info!("Starting chunkscribe v{}", env!("CARGO_PKG_VERSION"));

    let config = match args.config.as_deref() {
        Some(path) => TranscriberConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TranscriberConfig::default(),
    };

    if let Some(parent) = args.job_store.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create job store directory")?;
    }

    let orchestrator = Arc::new(build_orchestrator(config, &args.job_store)?);

    // Jobs submitted by a previous run keep getting polled.
    orchestrator.tracker().resume().await;

    if args.check_jobs {
        orchestrator
            .tracker()
            .check_for_completed_jobs()
            .await
            .context("Job check failed")?;
        let pending = orchestrator.tracker().pending().context("Job store read failed")?;
        for job in &pending {
            println!("{}  {}", job.job_id, job.display_name);
        }
        info!("{} job(s) still pending", pending.len());
        orchestrator.tracker().stop().await;
        return Ok(());
    }

    let audio = args
        .audio
        .context("An audio file is required unless --check-jobs is given")?;

    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; cancelling");
                orchestrator.cancel();
            }
        });
    }

    let result = orchestrator
        .transcribe(&audio, args.engine.map(Into::into))
        .await;

    match result {
        Ok(result) => {
            if let Some(job_id) = result.job_id.as_deref() {
                info!("Accepted as job {}", job_id);
                if args.wait {
                    wait_for_job(&orchestrator, job_id).await?;
                } else {
                    println!("{}", job_id);
                }
            } else if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result).context("Failed to encode result")?
                );
            } else {
                println!("{}", result.text);
            }
            orchestrator.tracker().stop().await;
            Ok(())
        }
        Err(e) => {
            error!("Transcription failed: {}", e);
            Err(e.into())
        }
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use warden_core::FeatureStore;
use warden_pipeline::{AppConfig, Pipeline, PipelineError, RunMode};
use warden_video::Camera;

/// How long `register` waits for a face to enter the admission window.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);
const REGISTER_RETRY: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "warden", about = "Warden face presence and identity verification")]
struct Cli {
    /// Config file path; ./warden.toml is used when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the verification pipeline, printing event records as JSON lines
    Run {
        /// Keep serving through per-frame errors instead of terminating
        #[arg(long)]
        service: bool,
    },
    /// Capture one admitted face and enroll it in the gallery
    Register {
        /// Name for the enrolled face (generated when omitted)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List enrolled faces
    List,
    /// Remove all enrolled samples under a name
    Remove { name: String },
    /// List usable capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { service } => {
            let mode = if service {
                RunMode::Service
            } else {
                RunMode::Standalone
            };
            run(config, mode).await
        }
        Commands::Register { name } => register(config, name).await,
        Commands::List => list(&config),
        Commands::Remove { name } => remove(&config, &name),
        Commands::Devices => {
            devices();
            Ok(())
        }
    }
}

async fn run(config: AppConfig, mode: RunMode) -> Result<()> {
    let (handle, mut frame_rx, mut log_rx) = Pipeline::spawn(config, mode)?;
    tracing::info!("pipeline running, press Ctrl-C to stop");

    // Frames are consumed to keep the sink flowing; a streaming collaborator
    // would forward them instead.
    let frames = tokio::spawn(async move {
        let mut received: u64 = 0;
        while frame_rx.recv().await.is_some() {
            received += 1;
        }
        tracing::debug!(received, "frame stream closed");
    });

    let logs = tokio::spawn(async move {
        while let Some(record) = log_rx.recv().await {
            match serde_json::to_string(&record) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "log record serialization failed"),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    let _ = frames.await;
    let _ = logs.await;
    Ok(())
}

/// Run the pipeline until a face is admitted, then enroll it.
async fn register(config: AppConfig, name: Option<String>) -> Result<()> {
    let (handle, mut frame_rx, mut log_rx) = Pipeline::spawn(config, RunMode::Service)?;

    // Keep the sinks drained while waiting.
    let frames = tokio::spawn(async move { while frame_rx.recv().await.is_some() {} });
    let logs = tokio::spawn(async move { while log_rx.recv().await.is_some() {} });

    println!("Look at the camera...");
    let deadline = Instant::now() + REGISTER_TIMEOUT;
    let result = loop {
        match handle.register(name.clone()).await {
            Ok(saved) => break Ok(saved),
            Err(PipelineError::NoFaceInRange) if Instant::now() < deadline => {
                tokio::time::sleep(REGISTER_RETRY).await;
            }
            Err(e) => break Err(e),
        }
    };

    handle.shutdown().await;
    let _ = frames.await;
    let _ = logs.await;

    match result {
        Ok(saved) => {
            println!("Registered {saved}");
            Ok(())
        }
        Err(PipelineError::NoFaceInRange) => anyhow::bail!(
            "no face entered the admission window within {}s",
            REGISTER_TIMEOUT.as_secs()
        ),
        Err(e) => Err(e.into()),
    }
}

fn list(config: &AppConfig) -> Result<()> {
    let store = FeatureStore::load(&config.recognition.store_path)
        .with_context(|| format!("failed to open store {}", config.recognition.store_path))?;
    if store.is_empty() {
        println!("No faces enrolled");
        return Ok(());
    }
    let mut counts: Vec<(String, usize)> = Vec::new();
    for record in store.records() {
        match counts.iter_mut().find(|(name, _)| *name == record.name) {
            Some((_, count)) => *count += 1,
            None => counts.push((record.name.clone(), 1)),
        }
    }
    for (name, count) in counts {
        let plural = if count == 1 { "" } else { "s" };
        println!("{name}  ({count} sample{plural})");
    }
    Ok(())
}

fn remove(config: &AppConfig, name: &str) -> Result<()> {
    let mut store = FeatureStore::load(&config.recognition.store_path)
        .with_context(|| format!("failed to open store {}", config.recognition.store_path))?;
    let removed = store.delete(name)?;
    let plural = if removed == 1 { "" } else { "s" };
    println!("Removed {removed} sample{plural} for {name}");
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No capture devices found");
        return;
    }
    for device in devices {
        println!("{}  {} ({})", device.path, device.name, device.driver);
    }
}

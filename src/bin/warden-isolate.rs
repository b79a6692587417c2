//! Isolate process entry point
//!
//! Launched by the executive with `[app_model, optional_config_override]`.
//! stdin carries inbound messages from the executive and stdout carries
//! outbound messages, so all logging goes to stderr. Exits with status 0
//! on clean termination and -1 if initialization fails.

use anyhow::{Context, anyhow};
use clap::Parser;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use warden::config::WardenConfig;
use warden::container::AppModel;
use warden::isolate::IsolateRuntime;
use warden::messaging::transport::{self, LinePipe, MessagePipe};
use warden::os::IsolateOs;

#[derive(Parser)]
#[command(name = "warden-isolate")]
#[command(about = "Isolate-side application runtime process", long_about = None)]
struct Cli {
    /// Application model hosted by this isolate (main, xlet, midlet)
    app_model: String,

    /// Optional config override file
    config: Option<PathBuf>,
}

fn main() {
    // stdout is the message channel; keep logs on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            tracing::error!(%error, "isolate initialization failed");
            std::process::exit(-1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = WardenConfig::load_with_override(cli.config.as_deref())
        .context("loading configuration")?;
    let model = AppModel::from_name(&cli.app_model)
        .ok_or_else(|| anyhow!("unknown app model {:?}", cli.app_model))?;

    let os = Arc::new(IsolateOs::from_env().context("resolving executive process id")?);
    let executive_pipe: Arc<dyn MessagePipe> = Arc::new(LinePipe::new(io::stdout()));

    let runtime = IsolateRuntime::builder(os, executive_pipe.clone(), model)
        .config(config)
        .build()
        .context("bootstrapping isolate runtime")?;

    // The listener thread keeps the process alive and feeds the
    // dispatcher; the main thread blocks until termination is requested.
    let dispatcher = runtime.dispatcher();
    let local = runtime.isolate_id();
    thread::Builder::new()
        .name("warden-listen".to_string())
        .spawn(move || {
            let reader = BufReader::new(io::stdin());
            if let Err(error) = transport::listen(reader, local, executive_pipe, dispatcher) {
                tracing::warn!(%error, "executive channel listener terminated");
            }
        })
        .context("spawning listener thread")?;

    runtime.wait_for_termination();
    tracing::info!("isolate terminating cleanly");
    Ok(())
}

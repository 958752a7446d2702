//! xmirror
//!
//! Mirrors the windows of an X11 desktop into a 3D scene (or an external VR
//! overlay) and routes pointer, keyboard and hand input back into them.

mod app;
mod config;
mod mirror;
mod overlay;
mod render;
mod shared;
mod synth;
mod transport;
mod vr;
mod x11_async;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app::MirrorApp;
use config::{Config, VrBackendKind};

#[derive(Parser, Debug)]
#[command(name = "xmirror")]
#[command(about = "Mirror an X11 desktop into a 3D scene")]
#[command(version)]
struct Cli {
    /// X display whose windows are mirrored (e.g. :1)
    #[arg(short, long)]
    display: Option<String>,

    /// Display that hosts the preview window
    #[arg(long)]
    surface_display: Option<String>,

    /// Configuration file (default: ~/.config/xmirror/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// VR input backend
    #[arg(long, value_enum)]
    vr_backend: Option<VrBackendKind>,

    /// Pose trace for the scripted backend
    #[arg(long)]
    vr_script: Option<PathBuf>,

    /// Serve mirrored windows to a VR overlay
    #[arg(long)]
    overlay: bool,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        self.apply(&mut config);
        Ok(config)
    }

    /// Command-line flags win over the file
    fn apply(&self, config: &mut Config) {
        if let Some(display) = &self.display {
            config.display.name = display.clone();
        }
        if let Some(display) = &self.surface_display {
            config.display.surface_name = Some(display.clone());
        }
        if let Some(backend) = self.vr_backend {
            config.vr.backend = backend;
        }
        if let Some(script) = &self.vr_script {
            config.vr.script = Some(script.clone());
            if self.vr_backend.is_none() {
                config.vr.backend = VrBackendKind::Scripted;
            }
        }
        if self.overlay {
            config.overlay.enabled = true;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "xmirror=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;
    info!("Starting xmirror on display {}", config.display.name);

    // Setup signal handlers for graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                }
            }
            let _ = tx.send(()).await;
        });
    }

    let app = MirrorApp::new(config).await?;
    if let Err(e) = app.run(shutdown_rx).await {
        error!("Application error: {:#}", e);
        return Err(e);
    }
    drop(shutdown_tx);

    info!("xmirror stopped");
    Ok(())
}

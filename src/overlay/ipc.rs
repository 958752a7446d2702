//! Unix socket server for the overlay process

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::{FramedMessage, MAX_FRAME_LEN, OverlayCommand, OverlayEvent};

/// `$XDG_RUNTIME_DIR/<name>`, or the temp directory when there is none
pub fn socket_path(name: &str) -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(name)
}

/// Socket server that fans commands out to every connected overlay
pub struct IpcServer {
    path: PathBuf,
    command_tx: broadcast::Sender<OverlayCommand>,
    event_tx: mpsc::Sender<OverlayEvent>,
    event_rx: mpsc::Receiver<OverlayEvent>,
}

impl IpcServer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (command_tx, _) = broadcast::channel(256);
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            path: path.into(),
            command_tx,
            event_tx,
            event_rx,
        }
    }

    /// Bind the socket and accept overlays in a background task
    pub async fn start(self) -> Result<IpcHandle> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove stale socket {:?}", self.path))?;
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.path)
            .with_context(|| format!("Failed to bind overlay socket {:?}", self.path))?;
        info!("Overlay socket listening on {:?}", self.path);

        let command_tx = self.command_tx.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        info!("Overlay connected");
                        let command_rx = command_tx.subscribe();
                        tokio::spawn(handle_client(stream, command_rx, event_tx.clone()));
                    }
                    Err(e) => {
                        error!("Overlay accept error: {}", e);
                    }
                }
            }
        });

        Ok(IpcHandle {
            path: self.path,
            command_tx: self.command_tx,
            event_rx: self.event_rx,
        })
    }
}

/// Frame-loop side of the overlay socket
pub struct IpcHandle {
    path: PathBuf,
    command_tx: broadcast::Sender<OverlayCommand>,
    event_rx: mpsc::Receiver<OverlayEvent>,
}

impl IpcHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send a command to every connected overlay
    pub fn broadcast(&self, command: OverlayCommand) {
        // No overlay connected is not an error
        let _ = self.command_tx.send(command);
    }

    /// Next pending event, without waiting
    pub fn try_recv_event(&mut self) -> Option<OverlayEvent> {
        self.event_rx.try_recv().ok()
    }
}

impl Drop for IpcHandle {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Could not remove overlay socket {:?}: {}", self.path, e);
        }
    }
}

async fn handle_client(
    stream: UnixStream,
    mut command_rx: broadcast::Receiver<OverlayCommand>,
    event_tx: mpsc::Sender<OverlayEvent>,
) {
    let (mut reader, mut writer) = stream.into_split();

    // overlay -> mirror
    let reader_task = tokio::spawn(async move {
        let mut len_buf = [0u8; 4];
        loop {
            if reader.read_exact(&mut len_buf).await.is_err() {
                break;
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                warn!("Overlay frame too large: {} bytes", len);
                break;
            }

            let mut msg_buf = vec![0u8; len];
            if reader.read_exact(&mut msg_buf).await.is_err() {
                break;
            }

            match FramedMessage::decode_event(&msg_buf) {
                Ok(event) => {
                    debug!("Overlay event: {:?}", event);
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to decode overlay event: {}", e);
                }
            }
        }
        debug!("Overlay reader ended");
    });

    // mirror -> overlay
    let writer_task = tokio::spawn(async move {
        loop {
            match command_rx.recv().await {
                Ok(command) => match FramedMessage::new(&command) {
                    Ok(msg) => {
                        if writer.write_all(&msg.encode()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to encode overlay command: {}", e);
                    }
                },
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Overlay lagged {} commands", n);
                }
            }
        }
        debug!("Overlay writer ended");
    });

    tokio::select! {
        _ = reader_task => {}
        _ = writer_task => {}
    }

    info!("Overlay disconnected");
}

//! Readiness-driven event streams for the X11 connections
//!
//! Both the mirrored display and the preview window's display are watched by
//! a blocking mio poller each. The poller only signals readiness; events are
//! pulled with `poll_for_event` and translated on the frame loop's thread, so
//! the registry never leaves it.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Notify, oneshot};
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

/// How often an idle poller checks whether its stream was dropped
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Wakes `notify` whenever `fd` turns readable, until `guard` is dropped
struct Readiness {
    notify: Arc<Notify>,
    // Dropping the receiver tells the poller thread to exit
    _guard: oneshot::Receiver<()>,
}

impl Readiness {
    fn watch(label: &'static str, fd: RawFd) -> Result<Self> {
        let notify = Arc::new(Notify::new());
        let task_notify = notify.clone();
        let (alive, guard) = oneshot::channel::<()>();

        let mut poll = mio::Poll::new().context("Failed to create mio Poll")?;
        let mut events = mio::Events::with_capacity(1);
        poll.registry()
            .register(&mut mio::unix::SourceFd(&fd), mio::Token(0), mio::Interest::READABLE)
            .with_context(|| format!("Failed to register {} connection with mio", label))?;

        tokio::task::spawn_blocking(move || {
            while !alive.is_closed() {
                if let Err(err) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                    warn!("{} socket poll failed: {:?}", label, err);
                    continue;
                }
                if !events.is_empty() {
                    task_notify.notify_one();
                }
            }
            debug!("{} poller stopped", label);
        });

        Ok(Self { notify, _guard: guard })
    }
}

/// Events of one X11 connection, translated into `E`
pub struct X11EventStream<E> {
    label: &'static str,
    conn: Arc<RustConnection>,
    translate: fn(Event) -> E,
    readiness: Readiness,
}

impl<E> X11EventStream<E> {
    /// Start watching `conn`. `label` names the connection in logs and errors.
    pub fn new(label: &'static str, conn: Arc<RustConnection>, translate: fn(Event) -> E) -> Result<Self> {
        let readiness = Readiness::watch(label, conn.stream().as_raw_fd())?;
        Ok(Self {
            label,
            conn,
            translate,
            readiness,
        })
    }

    /// Next buffered event, or `None` once the buffer is drained.
    ///
    /// An error means the server connection is gone.
    pub fn next_event(&self) -> Result<Option<E>> {
        let event = self
            .conn
            .poll_for_event()
            .with_context(|| format!("Lost connection to the {} server", self.label))?;
        Ok(event.map(self.translate))
    }

    /// Resolves once the poller saw the socket become readable
    pub async fn wait_readable(&self) {
        self.readiness.notify.notified().await;
    }
}

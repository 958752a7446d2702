//! Frame loop
//!
//! One thread drives everything: each frame drains the mirrored display, the
//! preview window and the overlay socket, advances VR input, then draws and
//! presents. Event handling itself lives in [`Session`].

pub mod session;

use std::time::Duration;

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{Config, OverlayConfig};
use crate::mirror::Ray;
use crate::overlay::ipc::socket_path;
use crate::overlay::{Flow, IpcHandle, IpcServer, OverlayBridge};
use crate::render::{FpsCounter, GlContext, SceneRenderer, SceneView};
use crate::synth::XTestSynth;
use crate::transport::surface::connect_surface;
use crate::transport::x11::{X11Transport, translate_display_event, translate_surface_event};
use crate::transport::{DisplayEvent, DisplayTransport, SurfaceEvent};
use crate::vr::{VrBackend, VrInteraction, select_backend};
use crate::x11_async::X11EventStream;

pub use session::{Change, Session};

const WINDOW_TITLE: &str = "xmirror";

/// Overlay socket plus the pieces that serve it
struct OverlayLink {
    bridge: OverlayBridge,
    ipc: IpcHandle,
    synth: XTestSynth,
}

impl OverlayLink {
    async fn start(config: &OverlayConfig, transport: &X11Transport) -> Result<Self> {
        let synth = XTestSynth::new(transport.connection(), transport.root())
            .context("Overlay input needs the XTEST extension")?;
        let ipc = IpcServer::new(socket_path(&config.socket_name)).start().await?;
        Ok(Self {
            bridge: OverlayBridge::new(config),
            ipc,
            synth,
        })
    }
}

pub struct MirrorApp {
    config: Config,
    transport: X11Transport,
    display_events: X11EventStream<DisplayEvent>,
    surface_events: X11EventStream<SurfaceEvent>,
    session: Session,
    // Declared before `gl`: textures are deleted while the context still exists
    renderer: SceneRenderer,
    gl: GlContext,
    /// Camera pose, scene units
    camera: Mat4,
    /// Desktop pixels per scene unit
    scale: f32,
    vr: Box<dyn VrBackend>,
    interaction: VrInteraction,
    overlay: Option<OverlayLink>,
    fps: FpsCounter,
    running: bool,
}

impl MirrorApp {
    /// Connect everything. Any failure here is fatal.
    pub async fn new(config: Config) -> Result<Self> {
        let transport = X11Transport::connect(&config.display.name)?;
        let display_events = X11EventStream::new("display", transport.connection(), translate_display_event)?;

        let vr = select_backend(&config.vr).context("Failed to start VR backend")?;

        let surface_name = config.display.surface_name.as_deref();
        let gl = GlContext::new(surface_name, WINDOW_TITLE, config.render.width, config.render.height)?;
        let renderer = SceneRenderer::new(config.render.width, config.render.height)?;
        let surface = connect_surface(surface_name, gl.window())?;
        let surface_events = X11EventStream::new("surface", surface, translate_surface_event)?;

        let overlay = if config.overlay.enabled {
            Some(OverlayLink::start(&config.overlay, &transport).await?)
        } else {
            None
        };

        let scale = config.scene.scale();
        let camera = Mat4::from_translation(Vec3::new(0.0, 0.0, config.scene.camera_distance));
        let session = Session::new(transport.root(), config.scene.stack_spacing);
        let interaction = VrInteraction::new(&config.vr, scale);

        Ok(Self {
            config,
            transport,
            display_events,
            surface_events,
            session,
            renderer,
            gl,
            camera,
            scale,
            vr,
            interaction,
            overlay,
            fps: FpsCounter::default(),
            running: true,
        })
    }

    /// Run until the quit key, an overlay shutdown or `shutdown` fires
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let screen = self.transport.screen_size();
        let changes = self.session.start(&self.transport, &mut self.renderer, screen)?;
        self.forward_changes(changes);
        self.transport.flush()?;

        let mut frames =
            tokio::time::interval(Duration::from_millis(self.config.render.frame_interval_ms.max(1)));
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let result = loop {
            if !self.running {
                break Ok(());
            }
            tokio::select! {
                _ = frames.tick() => {
                    if let Err(e) = self.frame() {
                        break Err(e);
                    }
                }
                () = self.display_events.wait_readable() => {
                    if let Err(e) = self.drain_display() {
                        break Err(e);
                    }
                }
                () = self.surface_events.wait_readable() => {
                    if let Err(e) = self.drain_surface() {
                        break Err(e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutdown requested");
                    self.running = false;
                }
            }
        };

        self.cleanup();
        result
    }

    fn frame(&mut self) -> Result<()> {
        self.drain_display()?;
        self.drain_surface()?;
        self.drain_overlay();
        self.update_vr();
        self.render();
        self.gl.swap_buffers();
        self.transport.flush()?;

        if let Some(fps) = self.fps.tick() {
            if self.config.render.log_fps {
                debug!("{:.1} FPS", fps);
            }
        }
        Ok(())
    }

    fn drain_display(&mut self) -> Result<()> {
        while let Some(event) = self.display_events.next_event()? {
            let changes = self
                .session
                .handle_display_event(&self.transport, &mut self.renderer, event);
            self.forward_changes(changes);
        }
        Ok(())
    }

    fn drain_surface(&mut self) -> Result<()> {
        while let Some(event) = self.surface_events.next_event()? {
            self.handle_surface_event(event);
        }
        Ok(())
    }

    fn handle_surface_event(&mut self, event: SurfaceEvent) {
        let mouse = !self.vr.is_active();
        match event {
            SurfaceEvent::Motion { x, y, .. } if mouse => {
                let ray = self.surface_ray(x, y);
                self.session.pointer_moved(&self.transport, &ray);
            }
            SurfaceEvent::Button { x, y, button, pressed, .. } if mouse => {
                let ray = self.surface_ray(x, y);
                self.session.pointer_button(&self.transport, &ray, button, pressed);
            }
            SurfaceEvent::Key { keycode, pressed, state } => {
                if keycode == self.config.input.quit_keycode {
                    if pressed {
                        info!("Quit key pressed");
                        self.running = false;
                    }
                    return;
                }
                if self.config.input.forward_keyboard {
                    self.session.key(&self.transport, keycode, pressed, state);
                }
            }
            SurfaceEvent::Resized { width, height } => self.renderer.resize(width, height),
            SurfaceEvent::Closed => {
                info!("Preview window closed");
                self.running = false;
            }
            _ => {}
        }
    }

    fn drain_overlay(&mut self) {
        let Some(link) = self.overlay.as_mut() else {
            return;
        };
        while let Some(event) = link.ipc.try_recv_event() {
            match link.bridge.on_event(self.session.registry(), event, &mut link.synth) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => self.running = false,
                Err(e) => debug!("Overlay input failed: {}", e),
            }
        }
    }

    fn update_vr(&mut self) {
        // One more pass after the backend goes idle lets the hands drop out
        if !self.vr.is_active() && !self.interaction.is_active() {
            return;
        }
        let poses = match self.vr.poll_poses() {
            Ok(poses) => poses,
            Err(e) => {
                warn!("No VR poses this frame: {}", e);
                return;
            }
        };
        let controls = self.vr.read_controls();
        let actions = self
            .interaction
            .update(self.session.registry(), &poses, controls, &mut self.camera);
        for action in actions {
            self.session.apply_vr_action(&self.transport, action);
        }
    }

    fn render(&mut self) {
        let (width, height) = self.renderer.size();
        let view = SceneView::new(width, height, self.camera, self.scale);
        self.renderer.render(
            self.session.registry(),
            &view,
            self.config.scene.background,
            self.interaction.cursor(),
            self.interaction.shadow(),
        );
    }

    fn surface_ray(&self, x: i32, y: i32) -> Ray {
        let (width, height) = self.renderer.size();
        surface_ray(&self.camera, self.scale, width, height, x, y)
    }

    /// Tell the overlay and the hands about texture and lifetime changes
    fn forward_changes(&mut self, changes: Vec<Change>) {
        for change in changes {
            match change {
                Change::Updated { window, outcome } => {
                    if let Some(link) = self.overlay.as_mut() {
                        for command in link.bridge.on_update(self.session.registry(), window, &outcome) {
                            link.ipc.broadcast(command);
                        }
                    }
                }
                Change::Closed(window) => {
                    self.interaction.forget_frame(window);
                    if let Some(link) = self.overlay.as_mut() {
                        if let Some(command) = link.bridge.on_closed(window) {
                            link.ipc.broadcast(command);
                        }
                    }
                }
            }
        }
    }

    fn cleanup(&mut self) {
        let closed = self.session.shutdown(&mut self.renderer);
        if let Some(link) = self.overlay.as_mut() {
            for command in link.bridge.close_all() {
                link.ipc.broadcast(command);
            }
        }
        if let Err(e) = self.transport.flush() {
            debug!("Final flush failed: {}", e);
        }
        info!("Stopped mirroring {} windows", closed.len());
    }
}

/// Pointer ray through preview pixel `(x, y)`, in desktop pixel space.
///
/// Matches the renderer's projection: the horizontal field spans the full
/// width at unit depth.
pub fn surface_ray(camera: &Mat4, scale: f32, width: u32, height: u32, x: i32, y: i32) -> Ray {
    let w = width.max(1) as f32;
    let h = height.max(1) as f32;
    let direction = Vec3::new(x as f32 * 2.0 / w - 1.0, -(y as f32 * 2.0 - h) / w, -1.0);
    Ray::new(camera.w_axis.truncate() * scale, camera.transform_vector3(direction))
}

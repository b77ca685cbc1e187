//! Full-Screen Window Backend
//!
//! [`DisplaySurface`] backed by a winit window presented through softbuffer.
//! The event loop is never run; it is pumped without blocking from the
//! session bridge's cooperative loop.

use image::{Rgb, RgbaImage};
use smartlock_session::{
    CancelCallback, DisplaySurface, Frame, PairingArtifact, Result, SessionError, SurfaceState,
    Viewport,
};
use softbuffer::{Context, Surface};
use std::num::NonZeroU32;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Fullscreen, Window, WindowId};

use crate::config::DisplayConfig;

/// Upper bound on event loop passes spent waiting for the window to appear
const STARTUP_PUMPS: usize = 200;

/// Wait per pass while the window is being created
const STARTUP_PUMP_TIMEOUT: Duration = Duration::from_millis(10);

/// Window appearance settings
#[derive(Debug, Clone)]
struct WindowSettings {
    title: String,
    fullscreen: bool,
    background: Rgb<u8>,
    fallback: Viewport,
}

/// Window and its presentation surface
///
/// Field order matters: the surface must drop before the context and window.
struct Presenter {
    surface: Surface<Rc<Window>, Rc<Window>>,
    _context: Context<Rc<Window>>,
    window: Rc<Window>,
}

impl Presenter {
    fn new(window: Window) -> Result<Self> {
        let window = Rc::new(window);
        let context = Context::new(window.clone())
            .map_err(|e| SessionError::Display(format!("Failed to create drawing context: {}", e)))?;
        let surface = Surface::new(&context, window.clone())
            .map_err(|e| SessionError::Display(format!("Failed to create drawing surface: {}", e)))?;

        Ok(Self {
            surface,
            _context: context,
            window,
        })
    }

    fn inner_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn present(&mut self, frame: &Frame) -> Result<()> {
        let viewport = frame.viewport();
        let (Some(width), Some(height)) =
            (NonZeroU32::new(viewport.width), NonZeroU32::new(viewport.height))
        else {
            return Ok(());
        };

        self.surface
            .resize(width, height)
            .map_err(|e| SessionError::Display(format!("Failed to resize surface: {}", e)))?;
        let mut buffer = self
            .surface
            .buffer_mut()
            .map_err(|e| SessionError::Display(format!("Failed to map surface buffer: {}", e)))?;
        buffer.copy_from_slice(frame.pixels());
        buffer
            .present()
            .map_err(|e| SessionError::Display(format!("Failed to present frame: {}", e)))
    }
}

/// Event handler state for the kiosk window
struct KioskApp {
    artifact: RgbaImage,
    settings: WindowSettings,
    presenter: Option<Presenter>,
    frame: Option<Frame>,
    cancel: Option<CancelCallback>,
    /// Cancel input arrived before a callback was registered
    cancel_requested: bool,
    closed: bool,
    torn_down: bool,
    error: Option<SessionError>,
}

impl KioskApp {
    fn new(artifact: RgbaImage, settings: WindowSettings) -> Self {
        Self {
            artifact,
            settings,
            presenter: None,
            frame: None,
            cancel: None,
            cancel_requested: false,
            closed: false,
            torn_down: false,
            error: None,
        }
    }

    fn state(&self) -> SurfaceState {
        if self.closed {
            SurfaceState::Closed
        } else if self.presenter.is_some() {
            SurfaceState::Shown
        } else {
            SurfaceState::NotCreated
        }
    }

    /// Rebuild the frame for the given display size
    fn recompose(&mut self, reported: Option<(u32, u32)>) {
        let viewport = Viewport::resolve(reported, self.settings.fallback);
        if self.frame.as_ref().map(Frame::viewport) == Some(viewport) {
            return;
        }
        debug!("Composing frame for {}x{}", viewport.width, viewport.height);
        self.frame = Some(Frame::compose(
            &self.artifact,
            viewport,
            self.settings.background,
        ));
    }

    /// Operator asked to leave: fire cancel once, then close
    ///
    /// A cancel before the callback is registered is held and delivered on
    /// registration.
    fn close(&mut self) {
        if let Some(callback) = self.cancel.take() {
            info!("Cancel requested from the kiosk window");
            callback();
        } else if !self.closed {
            info!("Cancel requested while the kiosk window was starting");
            self.cancel_requested = true;
        }
        self.release();
    }

    fn register_cancel(&mut self, callback: CancelCallback) {
        if self.cancel_requested {
            self.cancel_requested = false;
            callback();
        } else if self.closed {
            warn!("Cancel callback registered after the window closed");
        } else {
            self.cancel = Some(callback);
        }
    }

    /// Release the window for good
    ///
    /// Returns `false` when an earlier teardown already did the work.
    fn teardown(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;
        self.release();
        true
    }

    /// Drop the window without firing cancel
    fn release(&mut self) {
        self.cancel = None;
        self.presenter = None;
        self.closed = true;
    }

    fn fail(&mut self, error: SessionError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn create_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let mut attributes = Window::default_attributes().with_title(self.settings.title.clone());
        if self.settings.fullscreen {
            attributes = attributes
                .with_decorations(false)
                .with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = event_loop
            .create_window(attributes)
            .map_err(|e| SessionError::Display(format!("Failed to create window: {}", e)))?;
        let presenter = Presenter::new(window)?;

        let size = presenter.inner_size();
        info!("Kiosk window shown ({}x{})", size.0, size.1);
        self.recompose(Some(size));
        presenter.window.request_redraw();
        self.presenter = Some(presenter);
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        if self.frame.is_none() {
            let size = self.presenter.as_ref().map(Presenter::inner_size);
            self.recompose(size);
        }
        match (self.presenter.as_mut(), self.frame.as_ref()) {
            (Some(presenter), Some(frame)) => presenter.present(frame),
            _ => Ok(()),
        }
    }
}

impl ApplicationHandler for KioskApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.presenter.is_some() || self.closed {
            return;
        }
        if let Err(e) = self.create_window(event_loop) {
            self.fail(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                self.close();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                self.recompose(Some((size.width, size.height)));
                if let Some(presenter) = &self.presenter {
                    presenter.window.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(e);
                }
            }
            WindowEvent::Destroyed => {
                debug!("Kiosk window destroyed");
                self.release();
            }
            _ => {}
        }
    }
}

/// Kiosk window showing one pairing artifact
pub struct WindowSurface {
    event_loop: EventLoop<()>,
    app: KioskApp,
    exited: bool,
}

impl WindowSurface {
    /// Open the full-screen window and show the artifact
    ///
    /// Returns once the window exists. Fails with `SessionError::Display`
    /// when no display is available.
    pub fn create_and_show(artifact: PairingArtifact, display: &DisplayConfig) -> Result<Self> {
        let background = display
            .background_color()
            .map_err(|e| SessionError::Display(format!("{:#}", e)))?;
        let settings = WindowSettings {
            title: display.title.clone(),
            fullscreen: display.fullscreen,
            background,
            fallback: display.fallback_viewport(),
        };

        let mut event_loop = EventLoop::new()
            .map_err(|e| SessionError::Display(format!("Failed to open display: {}", e)))?;
        let mut app = KioskApp::new(artifact.into_image(), settings);

        for _ in 0..STARTUP_PUMPS {
            let status = event_loop.pump_app_events(Some(STARTUP_PUMP_TIMEOUT), &mut app);
            if let Some(e) = app.error.take() {
                return Err(e);
            }
            if app.state() == SurfaceState::Shown {
                return Ok(Self {
                    event_loop,
                    app,
                    exited: false,
                });
            }
            // Operator cancel during startup ends the run through the bridge
            if app.cancel_requested {
                return Ok(Self {
                    event_loop,
                    app,
                    exited: matches!(status, PumpStatus::Exit(_)),
                });
            }
            if let PumpStatus::Exit(code) = status {
                return Err(SessionError::Display(format!(
                    "Event loop exited during startup (code {})",
                    code
                )));
            }
        }

        Err(SessionError::Display(
            "Timed out waiting for the kiosk window".to_string(),
        ))
    }
}

impl DisplaySurface for WindowSurface {
    fn pump(&mut self) -> Result<()> {
        if self.exited {
            return Ok(());
        }

        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.app);
        if let Some(e) = self.app.error.take() {
            return Err(e);
        }
        if let PumpStatus::Exit(code) = status {
            debug!("Kiosk event loop exited with code {}", code);
            self.exited = true;
            self.app.release();
        }
        Ok(())
    }

    fn on_cancel(&mut self, callback: CancelCallback) {
        self.app.register_cancel(callback);
    }

    fn teardown(&mut self) {
        if !self.app.teardown() {
            return;
        }

        // One more pass lets the backend process the window destruction
        if !self.exited {
            if let PumpStatus::Exit(_) = self
                .event_loop
                .pump_app_events(Some(Duration::ZERO), &mut self.app)
            {
                self.exited = true;
            }
            self.app.error = None;
        }
        debug!("Kiosk window torn down");
    }

    fn state(&self) -> SurfaceState {
        self.app.state()
    }
}

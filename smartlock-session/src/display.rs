//! Display Surface
//!
//! Contract for the full-screen surface that shows the pairing artifact, plus
//! the backend-independent geometry and frame composition every backend
//! shares.
//!
//! ## Lifecycle
//!
//! ```text
//! not-created --create_and_show--> shown --cancel / teardown--> closed
//! ```
//!
//! A surface is created once per run and never recreated. Backends provide a
//! `create_and_show(artifact, ..)` constructor; after that the owner only
//! pumps it, registers the cancel callback, and tears it down.
//!
//! ## Ownership
//!
//! Presentation backends do not keep backing pixel data alive on their own.
//! Whoever renders an image holds it for exactly as long as the surface
//! showing it is alive: backends keep their composed [`Frame`] as a field and
//! re-present it on every redraw.

use crate::Result;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbaImage};
use tracing::{debug, trace};

/// Fallback display area when the real one cannot be determined
pub const DEFAULT_VIEWPORT: Viewport = Viewport {
    width: 800,
    height: 600,
};

/// Callback fired when the operator requests cancellation
pub type CancelCallback = Box<dyn FnOnce() + Send + 'static>;

/// Display surface lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    /// Backend not initialized yet
    NotCreated,
    /// Window is up and showing the artifact
    Shown,
    /// Window closed by cancel or teardown
    Closed,
}

/// Full-screen surface showing one pairing artifact
///
/// Implementations are driven from a single cooperative thread: `pump` must
/// never block or suspend.
pub trait DisplaySurface {
    /// Process pending input and redraw work without blocking
    ///
    /// Returns immediately whether or not there was work. Safe to call at a
    /// steady cadence and after the surface has closed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Display` if the rendering backend failed.
    fn pump(&mut self) -> Result<()>;

    /// Register the cancel input
    ///
    /// The callback fires at most once, after which the surface closes.
    fn on_cancel(&mut self, callback: CancelCallback);

    /// Destroy the window
    ///
    /// Idempotent: safe to call repeatedly or after the window is gone.
    fn teardown(&mut self);

    /// Current lifecycle state
    fn state(&self) -> SurfaceState;
}

/// Display area in physical pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Viewport {
    /// Create a viewport
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Resolve a reported display size, falling back when it is unusable
    ///
    /// Headless sessions and some compositors report a zero-sized area before
    /// the first configure; that must not fail startup.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use smartlock_session::display::{Viewport, DEFAULT_VIEWPORT};
    ///
    /// assert_eq!(Viewport::resolve(Some((1920, 1080)), DEFAULT_VIEWPORT), Viewport::new(1920, 1080));
    /// assert_eq!(Viewport::resolve(Some((0, 1080)), DEFAULT_VIEWPORT), DEFAULT_VIEWPORT);
    /// assert_eq!(Viewport::resolve(None, DEFAULT_VIEWPORT), DEFAULT_VIEWPORT);
    /// ```
    pub fn resolve(reported: Option<(u32, u32)>, fallback: Viewport) -> Viewport {
        match reported {
            Some((width, height)) if width > 0 && height > 0 => Viewport { width, height },
            _ => {
                debug!(
                    "Display area unavailable ({:?}), using {}x{}",
                    reported, fallback.width, fallback.height
                );
                fallback
            }
        }
    }

    /// Pixel count
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Scale `source` to fill `target` while preserving its aspect ratio
///
/// Neither side of the result is ever zero, and neither exceeds the target.
///
/// # Examples
///
/// ```rust
/// use smartlock_session::display::fit_within;
///
/// assert_eq!(fit_within((512, 256), (800, 600)), (800, 400));
/// assert_eq!(fit_within((100, 100), (1920, 1080)), (1080, 1080));
/// assert_eq!(fit_within((4000, 1), (10, 10)), (10, 1));
/// ```
pub fn fit_within(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = (u64::from(source.0.max(1)), u64::from(source.1.max(1)));
    let (tw, th) = (u64::from(target.0.max(1)), u64::from(target.1.max(1)));

    let (w, h) = if sw * th >= sh * tw {
        // Width-limited
        (tw, (sh * tw + sw / 2) / sw)
    } else {
        // Height-limited
        ((sw * th + sh / 2) / sh, th)
    };

    (w.clamp(1, tw) as u32, h.clamp(1, th) as u32)
}

/// Rectangle occupied by the scaled artifact inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Scaled width
    pub width: u32,
    /// Scaled height
    pub height: u32,
}

/// Composed full-screen pixels ready for presentation
///
/// Pixels are `0RGB` packed `u32` values in row-major order, the layout
/// software presenters expect.
#[derive(Debug, Clone)]
pub struct Frame {
    viewport: Viewport,
    placement: Placement,
    pixels: Vec<u32>,
}

impl Frame {
    /// Scale the artifact into the viewport and centre it on the background
    ///
    /// Uses Lanczos3 resampling; transparent artifact pixels are blended onto
    /// the background.
    pub fn compose(artifact: &RgbaImage, viewport: Viewport, background: Rgb<u8>) -> Frame {
        let (width, height) = fit_within(artifact.dimensions(), (viewport.width, viewport.height));
        let scaled = if (width, height) == artifact.dimensions() {
            artifact.clone()
        } else {
            imageops::resize(artifact, width, height, FilterType::Lanczos3)
        };

        let placement = Placement {
            x: (viewport.width - width) / 2,
            y: (viewport.height - height) / 2,
            width,
            height,
        };

        let mut pixels = vec![pack(background); viewport.area()];
        for (x, y, pixel) in scaled.enumerate_pixels() {
            let index = (placement.y + y) as usize * viewport.width as usize + (placement.x + x) as usize;
            pixels[index] = pack(blend(pixel.0, background));
        }

        trace!(
            "Composed {}x{} frame, artifact at {:?}",
            viewport.width,
            viewport.height,
            placement
        );

        Frame {
            viewport,
            placement,
            pixels,
        }
    }

    /// Frame size
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Where the artifact sits in the frame
    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Packed pixels, `width * height` long
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.viewport.width || y >= self.viewport.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.viewport.width as usize + x as usize)
            .copied()
    }
}

fn blend(rgba: [u8; 4], background: Rgb<u8>) -> Rgb<u8> {
    let alpha = u32::from(rgba[3]);
    let mix = |fg: u8, bg: u8| ((u32::from(fg) * alpha + u32::from(bg) * (255 - alpha) + 127) / 255) as u8;
    Rgb([
        mix(rgba[0], background.0[0]),
        mix(rgba[1], background.0[1]),
        mix(rgba[2], background.0[2]),
    ])
}

/// Pack an RGB colour as `0RGB`
pub fn pack(color: Rgb<u8>) -> u32 {
    let [r, g, b] = color.0;
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

//! Pairing Artifact
//!
//! The scannable image a companion app reads to start proximity pairing.
//!
//! An artifact is produced once by the protocol collaborator and is read-only
//! afterwards. It can come from three places:
//!
//! - an image file written by the verifier (PNG, JPEG)
//! - encoded PNG bytes (e.g. a verifier command's stdout)
//! - a [`PairingPayload`], rendered here as a QR code
//!
//! ## Payload Format
//!
//! ```json
//! {
//!     "public_key": "04a1...",
//!     "name": "PingPongVerifier1234",
//!     "service": "6e400001-b5a3-f393-e0a9-e50e24dcca9e",
//!     "characteristic": "6e400002-b5a3-f393-e0a9-e50e24dcca9e"
//! }
//! ```
//!
//! Companion apps reject codes missing any of these fields, so the payload is
//! validated before it is encoded.

use crate::{Result, SessionError};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use qrcode::{Color, QrCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, trace};
use uuid::Uuid;

/// Quiet zone around the QR symbol, in modules
pub const QR_QUIET_ZONE: u32 = 4;

/// Pixels per QR module in the rendered artifact
pub const QR_MODULE_PIXELS: u32 = 8;

const DARK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const LIGHT: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Information a companion app needs to reach the verifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingPayload {
    /// Verifier public key as published by the protocol daemon
    pub public_key: String,
    /// Advertised verifier name
    pub name: String,
    /// GATT service UUID the verifier listens on
    pub service: String,
    /// GATT characteristic UUID used for the exchange
    pub characteristic: String,
}

impl PairingPayload {
    /// Check that every field a companion app requires is present
    ///
    /// # Examples
    ///
    /// ```rust
    /// use smartlock_session::PairingPayload;
    ///
    /// let payload = PairingPayload {
    ///     public_key: "04a1b2".into(),
    ///     name: "PingPongVerifier1234".into(),
    ///     service: "6e400001-b5a3-f393-e0a9-e50e24dcca9e".into(),
    ///     characteristic: "6e400002-b5a3-f393-e0a9-e50e24dcca9e".into(),
    /// };
    /// assert!(payload.validate().is_ok());
    ///
    /// let missing = PairingPayload { public_key: String::new(), ..payload };
    /// assert!(missing.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("public_key", &self.public_key),
            ("name", &self.name),
            ("service", &self.service),
            ("characteristic", &self.characteristic),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(SessionError::Artifact(format!(
                    "pairing payload missing required field '{}'",
                    field
                )));
            }
        }

        for (field, value) in [("service", &self.service), ("characteristic", &self.characteristic)] {
            Uuid::parse_str(value).map_err(|e| {
                SessionError::Artifact(format!("pairing payload field '{}' is not a UUID: {}", field, e))
            })?;
        }

        Ok(())
    }

    /// Short fingerprint of the public key, safe to log
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.public_key.as_bytes());
        hex::encode(&digest[..8])
    }

    /// JSON text encoded into the QR symbol
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// An in-memory raster image representing a scannable pairing code
#[derive(Debug, Clone)]
pub struct PairingArtifact {
    image: RgbaImage,
}

impl PairingArtifact {
    /// Wrap an already decoded image
    ///
    /// Empty images are rejected: nothing could be scanned from them.
    pub fn from_image(image: DynamicImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(SessionError::Artifact(format!(
                "pairing artifact has no pixels ({}x{})",
                image.width(),
                image.height()
            )));
        }
        Ok(Self {
            image: image.into_rgba8(),
        })
    }

    /// Load an artifact from an image file written by the verifier
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading pairing artifact from {:?}", path);

        let image = image::open(path).map_err(|e| {
            SessionError::Artifact(format!("failed to load image from {:?}: {}", path, e))
        })?;

        trace!("Loaded artifact: {}x{}", image.width(), image.height());
        Self::from_image(image)
    }

    /// Decode an artifact from encoded image bytes (PNG, JPEG)
    pub fn from_encoded(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(SessionError::Artifact("verifier returned no image data".to_string()));
        }
        let image = image::load_from_memory(bytes)
            .map_err(|e| SessionError::Artifact(format!("failed to decode image: {}", e)))?;
        Self::from_image(image)
    }

    /// Render a pairing payload as a QR code
    pub fn from_payload(payload: &PairingPayload) -> Result<Self> {
        payload.validate()?;
        let json = payload.to_json()?;

        let code = QrCode::new(json.as_bytes())
            .map_err(|e| SessionError::Artifact(format!("failed to encode QR code: {}", e)))?;

        debug!(
            "Rendering pairing QR code for {} (key fingerprint {}, {} modules)",
            payload.name,
            payload.fingerprint(),
            code.width()
        );

        let image = render_qr(&code);
        Ok(Self { image })
    }

    /// Pixel dimensions (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Borrow the underlying raster
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Consume the artifact, handing over the raster
    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Encode the artifact as PNG bytes
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.image.write_to(&mut buffer, ImageFormat::Png)?;

        let png_bytes = buffer.into_inner();
        debug!("Encoded pairing artifact as PNG: {} bytes", png_bytes.len());
        Ok(png_bytes)
    }
}

/// Draw QR modules black-on-white with a quiet zone
fn render_qr(code: &QrCode) -> RgbaImage {
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let side = (modules + 2 * QR_QUIET_ZONE) * QR_MODULE_PIXELS;

    RgbaImage::from_fn(side, side, |x, y| {
        let mx = (x / QR_MODULE_PIXELS) as i64 - QR_QUIET_ZONE as i64;
        let my = (y / QR_MODULE_PIXELS) as i64 - QR_QUIET_ZONE as i64;
        if mx < 0 || my < 0 || mx >= modules as i64 || my >= modules as i64 {
            return LIGHT;
        }
        match colors[(my as usize) * modules as usize + mx as usize] {
            Color::Dark => DARK,
            Color::Light => LIGHT,
        }
    })
}

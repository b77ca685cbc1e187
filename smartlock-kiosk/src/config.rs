//! Kiosk Configuration
//!
//! Configuration management for the Smartlock kiosk. Loaded from
//! `<config_dir>/smartlock/kiosk.toml` unless `--config` points elsewhere.

use anyhow::{Context, Result};
use image::Rgb;
use serde::{Deserialize, Serialize};
use smartlock_session::{ArtifactSource, BridgeConfig, VerifierSettings, Viewport};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kiosk configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Window configuration
    #[serde(default)]
    pub display: DisplayConfig,

    /// Run-loop timing
    #[serde(default)]
    pub session: SessionConfig,

    /// External verifier
    #[serde(default)]
    pub verifier: VerifierConfig,
}

/// Window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Window title
    #[serde(default = "default_title")]
    pub title: String,

    /// Background colour around the pairing code (`#rrggbb`)
    #[serde(default = "default_background")]
    pub background: String,

    /// Width used when the display area cannot be determined
    #[serde(default = "default_fallback_width")]
    pub fallback_width: u32,

    /// Height used when the display area cannot be determined
    #[serde(default = "default_fallback_height")]
    pub fallback_height: u32,

    /// Borderless full-screen window
    #[serde(default = "default_true")]
    pub fullscreen: bool,
}

/// Run-loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Interval between display pumps in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Upper bound on the session stop call in seconds
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// How long a spawned verifier must survive to count as started
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,

    /// How long the verifier may take to exit after its stop command
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

/// External verifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Name the verifier advertises
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Command that runs the protocol daemon
    #[serde(default)]
    pub start_command: Option<String>,

    /// Command that ends the session
    #[serde(default)]
    pub stop_command: Option<String>,

    /// Where the pairing code comes from
    #[serde(default = "default_artifact")]
    pub artifact: ArtifactSource,
}

fn default_title() -> String {
    "Smartlock".to_string()
}

fn default_background() -> String {
    "#ffffff".to_string()
}

fn default_fallback_width() -> u32 {
    800
}

fn default_fallback_height() -> u32 {
    600
}

fn default_true() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_stop_timeout_secs() -> u64 {
    5
}

fn default_startup_grace_ms() -> u64 {
    250
}

fn default_stop_grace_ms() -> u64 {
    2000
}

fn default_display_name() -> String {
    "PingPongVerifier1234".to_string()
}

fn default_artifact() -> ArtifactSource {
    ArtifactSource::Path {
        path: dirs::runtime_dir()
            .or_else(dirs::data_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("smartlock")
            .join("pairing.png"),
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            background: default_background(),
            fallback_width: default_fallback_width(),
            fallback_height: default_fallback_height(),
            fullscreen: default_true(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
            startup_grace_ms: default_startup_grace_ms(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            start_command: None,
            stop_command: None,
            artifact: default_artifact(),
        }
    }
}

impl DisplayConfig {
    /// Parse the background colour
    pub fn background_color(&self) -> Result<Rgb<u8>> {
        parse_hex_color(&self.background)
            .with_context(|| format!("Invalid background colour '{}'", self.background))
    }

    /// Display area used when the real one is unknown
    pub fn fallback_viewport(&self) -> Viewport {
        Viewport::new(self.fallback_width, self.fallback_height)
    }
}

impl SessionConfig {
    /// Bridge timing derived from this section
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
        }
    }
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("smartlock")
            .join("kiosk.toml")
    }

    /// Load configuration, writing defaults if the file does not exist
    ///
    /// A failed write of the defaults is logged; the defaults are still used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        let config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Config::default();
            match config.save_to(&config_path) {
                Ok(()) => tracing::info!("Wrote default configuration to {}", config_path.display()),
                Err(e) => tracing::warn!("Could not write default configuration: {:#}", e),
            }
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Serialize as pretty TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Reject values the kiosk cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.session.tick_interval_ms == 0 {
            anyhow::bail!("session.tick_interval_ms must be greater than zero");
        }
        if self.display.fallback_width == 0 || self.display.fallback_height == 0 {
            anyhow::bail!("display fallback dimensions must be greater than zero");
        }
        if self.session.stop_grace_ms >= self.session.stop_timeout_secs.saturating_mul(1000) {
            anyhow::bail!("session.stop_grace_ms must be shorter than session.stop_timeout_secs");
        }
        self.display.background_color()?;
        Ok(())
    }

    /// Verifier process settings derived from this configuration
    pub fn verifier_settings(&self) -> VerifierSettings {
        VerifierSettings {
            artifact: self.verifier.artifact.clone(),
            start_command: self.verifier.start_command.clone(),
            stop_command: self.verifier.stop_command.clone(),
            startup_grace: Duration::from_millis(self.session.startup_grace_ms),
            stop_grace: Duration::from_millis(self.session.stop_grace_ms),
        }
    }
}

fn parse_hex_color(value: &str) -> Result<Rgb<u8>> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        anyhow::bail!("expected six hex digits");
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16).context("expected six hex digits")
    };
    Ok(Rgb([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
}

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const MIN_RATE: f32 = 0.5;
pub const MAX_RATE: f32 = 2.0;

/// Persisted voice settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoicePreferences {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Slower than normal by default for elderly patients
    #[serde(default = "default_rate")]
    pub rate: f32,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_enabled() -> bool { true }
fn default_rate() -> f32 { 0.85 }
fn default_volume() -> f32 { 1.0 }

impl Default for VoicePreferences {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            rate: default_rate(),
            volume: default_volume(),
        }
    }
}

impl VoicePreferences {
    pub fn clamped(self) -> Self {
        Self {
            enabled: self.enabled,
            rate: clamp_rate(self.rate),
            volume: clamp_volume(self.volume),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let prefs: VoicePreferences = toml::from_str(&content)?;
        Ok(prefs.clamped())
    }

    /// Missing or unreadable files fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "voice preferences unreadable, using defaults");
            Self::default()
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string(self)?;
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

pub fn clamp_rate(rate: f32) -> f32 {
    rate.clamp(MIN_RATE, MAX_RATE)
}

pub fn clamp_volume(volume: f32) -> f32 {
    volume.clamp(0.0, 1.0)
}

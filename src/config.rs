use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::render::OverlayStyle;
use crate::session::SessionTiming;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub pacer: PacerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub narration: NarrationConfig,
    #[serde(default)]
    pub relaxation: RelaxationConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// REST ベースURL（種目一覧・セッション・個人設定）
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// WebSocket ベースURL。`/ws/exercise/{name}` を付加する
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Bearer トークン（空なら匿名）
    #[serde(default)]
    pub token: String,
    /// REST 呼び出しのタイムアウト
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String { "http://localhost:8000".to_string() }
fn default_ws_url() -> String { "ws://localhost:8000".to_string() }
fn default_request_timeout_ms() -> u64 { 5000 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: default_ws_url(),
            token: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: i32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// JPEG品質 (0-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: i32,
    /// デバイスの代わりにこのディレクトリのJPEGを再生する
    #[serde(default)]
    pub replay_dir: Option<PathBuf>,
}

fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_jpeg_quality() -> i32 { 80 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_width(),
            height: default_height(),
            jpeg_quality: default_jpeg_quality(),
            replay_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PacerConfig {
    /// フレーム送信の最小間隔
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// 表示同期tickのレート
    #[serde(default = "default_display_hz")]
    pub display_hz: u32,
}

fn default_frame_interval_ms() -> u64 { 40 }
fn default_display_hz() -> u32 { 60 }

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            display_hz: default_display_hz(),
        }
    }
}

impl PacerConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn display_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.display_hz.max(1)))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    #[serde(default = "default_start_cue_delay_ms")]
    pub start_cue_delay_ms: u64,
    #[serde(default = "default_time_cues")]
    pub time_cues: Vec<u32>,
    #[serde(default = "default_error_cooldown_ms")]
    pub error_cooldown_ms: u64,
    /// 個人設定にも種目一覧にも目標回数がない場合の既定値
    #[serde(default = "default_target")]
    pub default_target: u32,
}

fn default_grace_ms() -> u64 { 2000 }
fn default_start_cue_delay_ms() -> u64 { 1000 }
fn default_time_cues() -> Vec<u32> { vec![60, 30, 10] }
fn default_error_cooldown_ms() -> u64 { 3000 }
fn default_target() -> u32 { 15 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            start_cue_delay_ms: default_start_cue_delay_ms(),
            time_cues: default_time_cues(),
            error_cooldown_ms: default_error_cooldown_ms(),
            default_target: default_target(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpeechBackend {
    /// 外部音声合成プロセス
    Espeak,
    /// 発話をログに出し、再生時間を模擬する
    Log,
    None,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NarrationConfig {
    #[serde(default = "default_engine")]
    pub engine: SpeechBackend,
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// 音声設定（有効・速度・音量）の保存先
    #[serde(default = "default_preferences_path")]
    pub preferences_path: PathBuf,
}

fn default_engine() -> SpeechBackend { SpeechBackend::Espeak }
fn default_program() -> String { "espeak-ng".to_string() }
fn default_voice() -> String { "vi".to_string() }
fn default_preferences_path() -> PathBuf { PathBuf::from("voice.toml") }

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            program: default_program(),
            voice: default_voice(),
            preferences_path: default_preferences_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelaxationConfig {
    #[serde(default = "default_relax_duration")]
    pub duration_secs: u32,
    #[serde(default = "default_relax_cues")]
    pub cues: Vec<u32>,
    #[serde(default = "default_intro_delay_ms")]
    pub intro_delay_ms: u64,
    #[serde(default = "default_offer_delay_ms")]
    pub offer_delay_ms: u64,
}

fn default_relax_duration() -> u32 { 180 }
fn default_relax_cues() -> Vec<u32> { vec![90, 30] }
fn default_intro_delay_ms() -> u64 { 3000 }
fn default_offer_delay_ms() -> u64 { 5000 }

impl Default for RelaxationConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_relax_duration(),
            cues: default_relax_cues(),
            intro_delay_ms: default_intro_delay_ms(),
            offer_delay_ms: default_offer_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OverlayConfig {
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f32,
    #[serde(default = "default_line_width")]
    pub line_width: i32,
    #[serde(default = "default_joint_radius")]
    pub joint_radius: i32,
    /// プレビューウィンドウを開く（desktopビルドのみ）
    #[serde(default)]
    pub window: bool,
}

fn default_visibility_threshold() -> f32 { 0.5 }
fn default_line_width() -> i32 { 4 }
fn default_joint_radius() -> i32 { 6 }

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: default_visibility_threshold(),
            line_width: default_line_width(),
            joint_radius: default_joint_radius(),
            window: false,
        }
    }
}

impl OverlayConfig {
    pub fn style(&self) -> OverlayStyle {
        OverlayStyle {
            visibility_threshold: self.visibility_threshold,
            line_width: self.line_width,
            joint_radius: self.joint_radius,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_dir() -> PathBuf { PathBuf::from("logs") }
fn default_log_filter() -> String { "info".to_string() }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            filter: default_log_filter(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Missing or broken files fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "using default configuration");
                Self::default()
            }
        }
    }

    pub fn session_timing(&self) -> SessionTiming {
        SessionTiming {
            grace: Duration::from_millis(self.session.grace_ms),
            start_cue_delay: Duration::from_millis(self.session.start_cue_delay_ms),
            time_cues: self.session.time_cues.clone(),
            error_cooldown: Duration::from_millis(self.session.error_cooldown_ms),
            relaxation_intro_delay: Duration::from_millis(self.relaxation.intro_delay_ms),
            relaxation_offer_delay: Duration::from_millis(self.relaxation.offer_delay_ms),
        }
    }
}

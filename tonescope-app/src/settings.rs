//! Persistent application settings (JSON file in app data directory).
//!
//! Precedence, lowest first: built-in defaults, the settings file,
//! `TONESCOPE_*` environment variables, command-line flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tonescope_core::{EngineConfig, MagnitudeMode, RawSampleFormat};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub sample_rate: u32,
    pub frame_seconds: u32,
    pub channels: u16,
    /// `0` lets the backend choose its block size.
    pub frames_per_buffer: u32,
    /// `0` captures until interrupted.
    pub max_frames: u32,
    pub poll_interval_ms: u64,
    pub magnitude_mode: String,
    pub raw_output: Option<PathBuf>,
    pub raw_format: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            sample_rate: 44_100,
            frame_seconds: 1,
            channels: 1,
            frames_per_buffer: 1_024,
            max_frames: 1,
            poll_interval_ms: 10,
            magnitude_mode: "real".into(),
            raw_output: None,
            raw_format: "f64".into(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.sample_rate = self.sample_rate.clamp(4_000, 384_000);
        self.frame_seconds = self.frame_seconds.clamp(1, 60);
        self.channels = self.channels.clamp(1, 2);
        if self.frames_per_buffer != 0 {
            self.frames_per_buffer = self.frames_per_buffer.clamp(16, 65_536);
        }
        self.poll_interval_ms = self.poll_interval_ms.clamp(1, 1_000);
        self.magnitude_mode = normalize_magnitude_mode(&self.magnitude_mode);
        self.raw_format = normalize_raw_format(&self.raw_format);
        self.raw_output = self
            .raw_output
            .take()
            .filter(|p| !p.as_os_str().is_empty());
    }

    /// Overlay `TONESCOPE_*` values. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(device) = lookup("TONESCOPE_INPUT_DEVICE") {
            self.preferred_input_device = Some(device);
        }
        if let Some(rate) = lookup("TONESCOPE_SAMPLE_RATE").and_then(|v| v.trim().parse().ok()) {
            self.sample_rate = rate;
        }
        if let Some(secs) = lookup("TONESCOPE_FRAME_SECONDS").and_then(|v| v.trim().parse().ok()) {
            self.frame_seconds = secs;
        }
        if let Some(frames) = lookup("TONESCOPE_MAX_FRAMES").and_then(|v| v.trim().parse().ok()) {
            self.max_frames = frames;
        }
        if let Some(block) =
            lookup("TONESCOPE_FRAMES_PER_BUFFER").and_then(|v| v.trim().parse().ok())
        {
            self.frames_per_buffer = block;
        }
        if let Some(mode) = lookup("TONESCOPE_MAGNITUDE_MODE") {
            self.magnitude_mode = mode;
        }
        if let Some(path) = lookup("TONESCOPE_RAW_OUT") {
            self.raw_output = Some(PathBuf::from(path));
        }
        if let Some(format) = lookup("TONESCOPE_RAW_FORMAT") {
            self.raw_format = format;
        }
        self.normalize();
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn magnitude_mode(&self) -> MagnitudeMode {
        match self.magnitude_mode.as_str() {
            "paired" => MagnitudeMode::Paired,
            _ => MagnitudeMode::Real,
        }
    }

    pub fn raw_format(&self) -> RawSampleFormat {
        RawSampleFormat::parse(&self.raw_format).unwrap_or_default()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sample_rate: self.sample_rate,
            frame_seconds: self.frame_seconds,
            channels: self.channels,
            frames_per_buffer: (self.frames_per_buffer != 0).then_some(self.frames_per_buffer),
            max_frames: (self.max_frames != 0).then_some(self.max_frames),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            magnitude_mode: self.magnitude_mode(),
            raw_output: self.raw_output.clone(),
            raw_format: self.raw_format(),
            preferred_input_device: self.preferred_input_device.clone(),
        }
    }
}

pub fn normalize_magnitude_mode(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "paired" | "complex" | "full" => "paired".into(),
        _ => "real".into(),
    }
}

pub fn normalize_raw_format(raw: &str) -> String {
    raw_format_name(RawSampleFormat::parse(raw).unwrap_or_default()).into()
}

pub fn raw_format_name(format: RawSampleFormat) -> &'static str {
    match format {
        RawSampleFormat::F64 => "f64",
        RawSampleFormat::F32 => "f32",
        RawSampleFormat::I16 => "i16",
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tonescope")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("tonescope")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

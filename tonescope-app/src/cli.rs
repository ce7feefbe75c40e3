//! Command-line flags.

use std::path::PathBuf;

use clap::Parser;
use tonescope_core::RawSampleFormat;

use crate::settings::{raw_format_name, AppSettings};

#[derive(Parser, Debug, Default, Clone, PartialEq)]
#[command(
    name = "tonescope",
    version,
    about = "Capture audio, analyze fixed-length frames and report the dominant bin"
)]
pub struct Cli {
    /// Settings file (default: platform data directory)
    #[arg(long = "settings", value_name = "FILE")]
    pub settings_path: Option<PathBuf>,

    /// Input device name (falls back to the default device)
    #[arg(long, value_name = "NAME")]
    pub device: Option<String>,

    /// Frames to analyze before stopping; 0 runs until Ctrl-C
    #[arg(long, value_name = "N")]
    pub frames: Option<u32>,

    /// Write the final frame as headerless raw samples
    #[arg(long, value_name = "FILE")]
    pub raw_out: Option<PathBuf>,

    /// Raw sample format: f64, f32 or i16
    #[arg(long, value_name = "FMT", value_parser = parse_raw_format)]
    pub raw_format: Option<RawSampleFormat>,

    /// Analyze a raw sample file instead of a live device
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,

    /// Pace replay at the configured sample rate
    #[arg(long, requires = "replay")]
    pub realtime: bool,

    /// Combine real and imaginary parts for bin magnitudes
    #[arg(long)]
    pub paired: bool,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// List input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Write the effective settings to the settings file and exit
    #[arg(long)]
    pub save_settings: bool,
}

impl Cli {
    /// Flags given on the command line win over settings and environment.
    pub fn apply_to(&self, settings: &mut AppSettings) {
        if let Some(device) = &self.device {
            settings.preferred_input_device = Some(device.clone());
        }
        if let Some(frames) = self.frames {
            settings.max_frames = frames;
        }
        if let Some(path) = &self.raw_out {
            settings.raw_output = Some(path.clone());
        }
        if let Some(format) = self.raw_format {
            settings.raw_format = raw_format_name(format).into();
        }
        if self.paired {
            settings.magnitude_mode = "paired".into();
        }
        settings.normalize();
    }
}

fn parse_raw_format(raw: &str) -> Result<RawSampleFormat, String> {
    RawSampleFormat::parse(raw).ok_or_else(|| format!("unknown raw format: {raw}"))
}

//! Rendering of pipeline events on stdout.

use tonescope_core::{audio::device::DeviceInfo, EventKind, PipelineState, ToneEvent};

/// One printable line for `event`, or `None` when text mode skips it.
pub fn render_event(event: &ToneEvent, json: bool) -> Option<String> {
    if json {
        return serde_json::to_string(event).ok();
    }
    match &event.event {
        EventKind::State {
            state: PipelineState::Capturing,
            ..
        } => Some("=== Now recording!! Please whistle into the microphone. ===".into()),
        EventKind::State {
            state: PipelineState::Failed,
            detail: Some(detail),
        } => Some(format!("capture failed: {detail}")),
        EventKind::State { .. } => None,
        EventKind::Peak {
            frame,
            report,
            frequency_hz,
        } => Some(format!(
            "[frame {frame}] Detected frequency: bin {} ({frequency_hz:.1} Hz) at velocity {}",
            report.bin_index, report.velocity
        )),
        EventKind::Stats(stats) => Some(format!(
            "sample max amplitude = {}\nsample average = {:.6}",
            stats.peak_amplitude, stats.average_amplitude
        )),
    }
}

pub fn render_devices(devices: &[DeviceInfo], json: bool) -> String {
    if json {
        return serde_json::to_string(devices).unwrap_or_default();
    }
    if devices.is_empty() {
        return "no input devices found".into();
    }
    devices
        .iter()
        .map(|d| {
            let mut line = format!("{} {}", if d.is_default { "*" } else { " " }, d.name);
            if let (Some(rate), Some(channels)) = (d.default_sample_rate, d.default_channels) {
                line.push_str(&format!(" ({rate} Hz, {channels} ch)"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

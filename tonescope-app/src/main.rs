//! tonescope command-line entry point.
//!
//! ## Runtime note
//!
//! The engine runs its blocking driver on tokio's blocking pool, so `main`
//! builds a multi-threaded runtime and drives the event loop from there.
//! Exit status is 0 on success and 1 on any setup or stream failure.
//!
//! The first Ctrl-C asks the engine to stop and drain. A second one exits at
//! once with status 1 without waiting for the capture thread.

mod cli;
mod output;
mod settings;

use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tonescope_core::{
    audio::device::list_input_devices, dump, CaptureOutcome, InputSource, ReplayBackend,
    ToneEngine, ToneError,
};
use tracing::{info, warn};

use cli::Cli;
use settings::{default_settings_path, load_settings, save_settings};

fn main() -> ExitCode {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("tonescope=info,tonescope_core=info")
            }),
        )
        .init();

    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version requests also arrive here.
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    if args.list_devices {
        println!("{}", output::render_devices(&list_input_devices(), args.json));
        return ExitCode::SUCCESS;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(args));
    // An aborted capture leaves its blocking thread behind; do not wait for it.
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_failure(&e);
            ExitCode::FAILURE
        }
    }
}

/// What a Ctrl-C means given how many came before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Stop,
    Abort,
}

#[derive(Debug, Default)]
struct InterruptTracker {
    seen: u32,
}

impl InterruptTracker {
    fn on_signal(&mut self) -> Interrupt {
        self.seen += 1;
        if self.seen == 1 {
            Interrupt::Stop
        } else {
            Interrupt::Abort
        }
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let settings_path = args
        .settings_path
        .clone()
        .unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    app_settings.apply_env_overrides();
    args.apply_to(&mut app_settings);

    if args.save_settings {
        save_settings(&settings_path, &app_settings)
            .with_context(|| format!("writing settings to {}", settings_path.display()))?;
        println!("settings saved to {}", settings_path.display());
        return Ok(());
    }

    let config = app_settings.engine_config();
    info!(
        settings_path = ?settings_path,
        sample_rate = config.sample_rate,
        frame_seconds = config.frame_seconds,
        channels = config.channels,
        frames_per_buffer = ?config.frames_per_buffer,
        max_frames = ?config.max_frames,
        magnitude_mode = ?config.magnitude_mode,
        "runtime settings loaded"
    );

    let source = match &args.replay {
        Some(path) => {
            let samples = dump::read_file(path, config.raw_format)
                .with_context(|| format!("reading replay file {}", path.display()))?;
            let backend = ReplayBackend::new(samples).realtime(args.realtime);
            if backend.is_empty() {
                warn!(path = %path.display(), "replay file holds no samples");
            }
            info!(path = %path.display(), samples = backend.len(), "replaying raw samples");
            InputSource::Replay(backend)
        }
        None => InputSource::Device,
    };

    let engine = ToneEngine::new(config);
    let mut events = engine.subscribe();
    let mut handle = engine.start(source)?;

    let mut interrupts = InterruptTracker::default();
    let joined = loop {
        tokio::select! {
            res = &mut handle => break res,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, args.json),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event consumer lagged"),
                Err(RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c() => match interrupts.on_signal() {
                Interrupt::Stop => {
                    info!("interrupted, stopping capture (Ctrl-C again to exit now)");
                    if let Err(e) = engine.stop() {
                        warn!("stop request ignored: {e}");
                    }
                }
                Interrupt::Abort => {
                    warn!("interrupted again, exiting without draining");
                    return Err(anyhow!("capture aborted by a second interrupt"));
                }
            },
        }
    };

    // Events sent while the task was finishing.
    loop {
        match events.try_recv() {
            Ok(event) => print_event(&event, args.json),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    let outcome: CaptureOutcome = joined.context("capture task panicked")??;
    let diagnostics = engine.diagnostics_snapshot();
    info!(
        frames_analyzed = outcome.frames_analyzed,
        samples = outcome.samples.len(),
        blocks_in = diagnostics.blocks_in,
        frames_completed = diagnostics.frames_completed,
        frames_dropped = diagnostics.frames_dropped,
        "capture finished"
    );
    Ok(())
}

fn print_event(event: &tonescope_core::ToneEvent, json: bool) {
    if let Some(line) = output::render_event(event, json) {
        println!("{line}");
    }
}

fn report_failure(err: &anyhow::Error) {
    eprintln!("An error occurred while using the input stream");
    if let Some(code) = err.downcast_ref::<ToneError>().and_then(ToneError::code) {
        eprintln!("Error number: {code}");
    }
    eprintln!("Error message: {err:#}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_interrupt_aborts() {
        let mut interrupts = InterruptTracker::default();
        assert_eq!(interrupts.on_signal(), Interrupt::Stop);
        assert_eq!(interrupts.on_signal(), Interrupt::Abort);
        assert_eq!(interrupts.on_signal(), Interrupt::Abort);
    }
}

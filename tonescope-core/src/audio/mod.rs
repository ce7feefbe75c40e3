//! Capture backends.
//!
//! # Design constraints
//!
//! The backend data callback runs on an OS audio thread, possibly at real-time
//! priority. It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! Every backend therefore forwards blocks straight into a [`CaptureSession`],
//! which writes into the pre-allocated frame through atomics only.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). A [`CpalStream`] must be created and dropped on the same thread;
//! the engine does this by running the whole driver inside `spawn_blocking`.

pub mod device;
pub mod replay;
pub mod sink;

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{BackendCode, Result, StreamOp, ToneError};

pub use replay::ReplayBackend;
pub use sink::{
    CallbackFlow, CaptureDiagnostics, CaptureSession, CaptureSink, DiagnosticsSnapshot,
};

/// Parameters used to open a capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// `None` lets the backend pick its own block size.
    pub frames_per_buffer: Option<u32>,
    /// Input device name; `None` selects the default input device.
    pub device: Option<String>,
}

/// Opens capture streams that feed a [`CaptureSession`].
pub trait CaptureBackend {
    type Stream: CaptureStream;

    /// Open (but do not start) a stream.
    fn open(&mut self, params: &StreamParams, session: CaptureSession) -> Result<Self::Stream>;
}

/// Lifecycle controls of an open capture stream.
pub trait CaptureStream {
    fn start(&mut self) -> Result<()>;

    /// `Ok(false)` once the stream has finished delivering data. A failure
    /// reported by the backend since the last poll surfaces as an error.
    fn is_active(&self) -> Result<bool>;

    fn stop(&mut self) -> Result<()>;

    /// Release the stream. Calling it twice is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// Activity flag and failure slot shared between a stream handle and its
/// callbacks.
#[derive(Debug, Default)]
pub struct StreamStatus {
    active: AtomicBool,
    failure: Mutex<Option<(BackendCode, String)>>,
}

impl StreamStatus {
    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Mark the stream as no longer delivering data.
    pub fn finish(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Record a backend failure. Only the first failure is kept.
    pub fn fail(&self, code: BackendCode, message: impl Into<String>) {
        let mut slot = self.failure.lock();
        if slot.is_none() {
            *slot = Some((code, message.into()));
        }
        drop(slot);
        self.finish();
    }

    /// Poll result: the recorded failure, if any, otherwise the activity flag.
    pub fn poll(&self) -> Result<bool> {
        if let Some((code, message)) = self.failure.lock().clone() {
            return Err(ToneError::backend(StreamOp::Poll, code, message));
        }
        Ok(self.is_active())
    }
}

#[cfg(feature = "audio-cpal")]
pub use cpal_backend::{CpalBackend, CpalStream};

#[cfg(feature = "audio-cpal")]
mod cpal_backend {
    use std::sync::Arc;

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        BufferSize, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    };
    use tracing::{error, info, warn};

    use super::{
        CallbackFlow, CaptureBackend, CaptureSession, CaptureStream, StreamParams, StreamStatus,
    };
    use crate::{
        buffering::FrameSample,
        error::{BackendCode, Result, StreamOp, ToneError},
    };

    /// Live microphone capture through the platform's default cpal host.
    #[derive(Debug, Default)]
    pub struct CpalBackend;

    impl CpalBackend {
        pub fn new() -> Self {
            Self
        }

        fn select_device(preferred_name: Option<&str>) -> Result<cpal::Device> {
            let host = cpal::default_host();

            if let Some(preferred_name) = preferred_name {
                match host.input_devices() {
                    Ok(mut devices) => {
                        let found = devices.find(|device| {
                            device
                                .name()
                                .map(|name| name == preferred_name)
                                .unwrap_or(false)
                        });
                        if let Some(device) = found {
                            return Ok(device);
                        }
                        warn!(
                            "preferred input device '{}' not found, falling back to default",
                            preferred_name
                        );
                    }
                    Err(e) => {
                        warn!("failed to list input devices while resolving preference: {e}");
                    }
                }
            }

            host.default_input_device()
                .ok_or(ToneError::NoDefaultInputDevice)
        }
    }

    impl CaptureBackend for CpalBackend {
        type Stream = CpalStream;

        fn open(&mut self, params: &StreamParams, session: CaptureSession) -> Result<CpalStream> {
            let device = Self::select_device(params.device.as_deref())?;

            info!(
                device = device.name().unwrap_or_default().as_str(),
                "opening input device"
            );

            let supported = device
                .default_input_config()
                .map_err(|e| open_error(default_config_code(&e), e))?;

            let config = StreamConfig {
                channels: params.channels,
                sample_rate: SampleRate(params.sample_rate),
                buffer_size: match params.frames_per_buffer {
                    Some(frames) => BufferSize::Fixed(frames),
                    None => BufferSize::Default,
                },
            };

            info!(
                sample_rate = params.sample_rate,
                channels = params.channels,
                frames_per_buffer = ?params.frames_per_buffer,
                sample_format = ?supported.sample_format(),
                "stream config selected"
            );

            let status = Arc::new(StreamStatus::default());
            let stream = match supported.sample_format() {
                SampleFormat::F32 => build_stream::<f32>(&device, &config, session, &status),
                SampleFormat::F64 => build_stream::<f64>(&device, &config, session, &status),
                SampleFormat::I16 => build_stream::<i16>(&device, &config, session, &status),
                SampleFormat::I32 => build_stream::<i32>(&device, &config, session, &status),
                SampleFormat::I8 => build_stream::<i8>(&device, &config, session, &status),
                SampleFormat::U16 => build_stream::<u16>(&device, &config, session, &status),
                SampleFormat::U8 => build_stream::<u8>(&device, &config, session, &status),
                fmt => {
                    return Err(ToneError::backend(
                        StreamOp::Open,
                        BackendCode::UnsupportedSampleFormat,
                        format!("unsupported sample format: {fmt:?}"),
                    ))
                }
            }
            .map_err(|e| open_error(build_code(&e), e))?;

            Ok(CpalStream {
                stream: Some(stream),
                status,
            })
        }
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut session: CaptureSession,
        status: &Arc<StreamStatus>,
    ) -> std::result::Result<Stream, cpal::BuildStreamError>
    where
        T: SizedSample + FrameSample,
    {
        let channels = usize::from(config.channels.max(1));
        let data_status = Arc::clone(status);
        let error_status = Arc::clone(status);

        device.build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !data_status.is_active() {
                    return;
                }
                let frames = data.len() / channels;
                if session.on_block(Some(data), frames) == CallbackFlow::Complete {
                    data_status.finish();
                }
            },
            move |err| {
                error!("audio stream error: {err}");
                let code = match err {
                    cpal::StreamError::DeviceNotAvailable => BackendCode::DeviceNotAvailable,
                    _ => BackendCode::BackendSpecific,
                };
                error_status.fail(code, err.to_string());
            },
            None,
        )
    }

    /// Handle to an open cpal input stream.
    ///
    /// **Not `Send`**: create and drop it on the same OS thread.
    pub struct CpalStream {
        stream: Option<Stream>,
        status: Arc<StreamStatus>,
    }

    impl CaptureStream for CpalStream {
        fn start(&mut self) -> Result<()> {
            let Some(stream) = self.stream.as_ref() else {
                return Err(closed_error(StreamOp::Start));
            };
            self.status.activate();
            stream.play().map_err(|e| {
                self.status.finish();
                let code = match e {
                    cpal::PlayStreamError::DeviceNotAvailable => BackendCode::DeviceNotAvailable,
                    _ => BackendCode::BackendSpecific,
                };
                ToneError::backend(StreamOp::Start, code, e.to_string())
            })
        }

        fn is_active(&self) -> Result<bool> {
            self.status.poll()
        }

        fn stop(&mut self) -> Result<()> {
            self.status.finish();
            let Some(stream) = self.stream.as_ref() else {
                return Ok(());
            };
            stream.pause().map_err(|e| {
                let code = match e {
                    cpal::PauseStreamError::DeviceNotAvailable => BackendCode::DeviceNotAvailable,
                    _ => BackendCode::BackendSpecific,
                };
                ToneError::backend(StreamOp::Stop, code, e.to_string())
            })
        }

        fn close(&mut self) -> Result<()> {
            self.status.finish();
            // Dropping the stream releases the device on this thread.
            self.stream.take();
            Ok(())
        }
    }

    fn open_error(code: BackendCode, err: impl std::fmt::Display) -> ToneError {
        ToneError::backend(StreamOp::Open, code, err.to_string())
    }

    fn closed_error(op: StreamOp) -> ToneError {
        ToneError::backend(op, BackendCode::InvalidArgument, "stream already closed")
    }

    fn build_code(err: &cpal::BuildStreamError) -> BackendCode {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => BackendCode::DeviceNotAvailable,
            cpal::BuildStreamError::StreamConfigNotSupported => BackendCode::ConfigNotSupported,
            cpal::BuildStreamError::InvalidArgument => BackendCode::InvalidArgument,
            cpal::BuildStreamError::StreamIdOverflow => BackendCode::StreamIdOverflow,
            _ => BackendCode::BackendSpecific,
        }
    }

    fn default_config_code(err: &cpal::DefaultStreamConfigError) -> BackendCode {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => BackendCode::DeviceNotAvailable,
            cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
                BackendCode::ConfigNotSupported
            }
            _ => BackendCode::BackendSpecific,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reports_first_failure_on_poll() {
        let status = StreamStatus::default();
        status.activate();
        assert!(status.poll().unwrap());

        status.fail(BackendCode::DeviceNotAvailable, "unplugged");
        status.fail(BackendCode::BackendSpecific, "later failure");

        let err = status.poll().unwrap_err();
        assert_eq!(err.code(), Some(BackendCode::DeviceNotAvailable.as_i32()));
        assert!(err.to_string().contains("unplugged"));
        assert!(!status.is_active());
    }

    #[test]
    fn finished_stream_polls_inactive() {
        let status = StreamStatus::default();
        status.activate();
        status.finish();
        assert!(!status.poll().unwrap());
    }
}

use std::fmt;

use thiserror::Error;

/// Stream lifecycle operation that surfaced a backend error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOp {
    Open,
    Start,
    Poll,
    Stop,
    Close,
}

impl fmt::Display for StreamOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamOp::Open => "opening the input stream",
            StreamOp::Start => "starting the input stream",
            StreamOp::Poll => "polling the input stream",
            StreamOp::Stop => "stopping the input stream",
            StreamOp::Close => "closing the input stream",
        };
        f.write_str(name)
    }
}

/// Numeric codes reported alongside backend failures.
///
/// Values are stable so they can be printed to users and matched in scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BackendCode {
    DeviceNotAvailable = 1,
    ConfigNotSupported = 2,
    InvalidArgument = 3,
    StreamIdOverflow = 4,
    BackendSpecific = 5,
    UnsupportedSampleFormat = 6,
    ReplaySource = 7,
    ThreadSpawn = 8,
}

impl BackendCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// All errors produced by tonescope-core.
#[derive(Debug, Error)]
pub enum ToneError {
    #[error("could not allocate {what} ({len} samples)")]
    Allocation { what: &'static str, len: usize },

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("transform plan error: {0}")]
    TransformPlan(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("error {op}: {message} (error number {})", .code.as_i32())]
    Backend {
        op: StreamOp,
        code: BackendCode,
        message: String,
    },

    #[error("capture is already running")]
    AlreadyRunning,

    #[error("capture is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToneError {
    pub fn backend(op: StreamOp, code: BackendCode, message: impl Into<String>) -> Self {
        ToneError::Backend {
            op,
            code,
            message: message.into(),
        }
    }

    /// Backend error number, when the failure came from the capture backend.
    pub fn code(&self) -> Option<i32> {
        match self {
            ToneError::Backend { code, .. } => Some(code.as_i32()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ToneError>;

//! Conversion of backend sample formats into frame values.
//!
//! Amplitudes keep their native scale: an `i16` sample of 1200 becomes
//! `1200.0`, an `f32` sample of 0.25 becomes `0.25`. Unsigned formats are
//! re-centered so that silence is always `0.0` in the frame.

/// A sample type the capture sink can copy into a [`SampleFrame`](super::SampleFrame).
pub trait FrameSample: Copy + Send + 'static {
    fn to_frame_value(self) -> f64;
}

impl FrameSample for f64 {
    fn to_frame_value(self) -> f64 {
        self
    }
}

impl FrameSample for f32 {
    fn to_frame_value(self) -> f64 {
        f64::from(self)
    }
}

impl FrameSample for i32 {
    fn to_frame_value(self) -> f64 {
        f64::from(self)
    }
}

impl FrameSample for i16 {
    fn to_frame_value(self) -> f64 {
        f64::from(self)
    }
}

impl FrameSample for i8 {
    fn to_frame_value(self) -> f64 {
        f64::from(self)
    }
}

impl FrameSample for u16 {
    fn to_frame_value(self) -> f64 {
        f64::from(self) - 32_768.0
    }
}

impl FrameSample for u8 {
    fn to_frame_value(self) -> f64 {
        f64::from(self) - 128.0
    }
}

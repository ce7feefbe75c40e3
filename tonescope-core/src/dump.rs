//! Headerless raw sample files.
//!
//! Samples are written interleaved, little-endian, one fixed-width value per
//! sample. Neither the sample width nor the channel count is stored: both come
//! from configuration, so the same [`RawSampleFormat`] must be used to read a
//! file back.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawSampleFormat {
    /// Frame values verbatim.
    #[default]
    F64,
    F32,
    /// Rounded and saturated to the 16-bit range.
    I16,
}

impl RawSampleFormat {
    pub fn width(self) -> usize {
        match self {
            RawSampleFormat::F64 => 8,
            RawSampleFormat::F32 => 4,
            RawSampleFormat::I16 => 2,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "f64" | "double" => Some(RawSampleFormat::F64),
            "f32" | "float" => Some(RawSampleFormat::F32),
            "i16" | "s16" | "int16" => Some(RawSampleFormat::I16),
            _ => None,
        }
    }
}

pub fn write_samples<W: Write>(mut out: W, samples: &[f64], format: RawSampleFormat) -> Result<()> {
    for &value in samples {
        match format {
            RawSampleFormat::F64 => out.write_all(&value.to_le_bytes())?,
            RawSampleFormat::F32 => out.write_all(&(value as f32).to_le_bytes())?,
            RawSampleFormat::I16 => out.write_all(&(value.round() as i16).to_le_bytes())?,
        }
    }
    out.flush()?;
    Ok(())
}

/// Decode raw bytes. A trailing partial sample is ignored.
pub fn read_samples<R: Read>(mut input: R, format: RawSampleFormat) -> Result<Vec<f64>> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;

    let samples = bytes
        .chunks_exact(format.width())
        .map(|chunk| match format {
            RawSampleFormat::F64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(chunk);
                f64::from_le_bytes(b)
            }
            RawSampleFormat::F32 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(chunk);
                f64::from(f32::from_le_bytes(b))
            }
            RawSampleFormat::I16 => f64::from(i16::from_le_bytes([chunk[0], chunk[1]])),
        })
        .collect();
    Ok(samples)
}

pub fn write_file(path: &Path, samples: &[f64], format: RawSampleFormat) -> Result<()> {
    let file = File::create(path)?;
    write_samples(BufWriter::new(file), samples, format)
}

pub fn read_file(path: &Path, format: RawSampleFormat) -> Result<Vec<f64>> {
    read_samples(File::open(path)?, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_output_saturates_and_rounds() {
        let mut buf = Vec::new();
        write_samples(&mut buf, &[1.6, -40_000.0, 40_000.0], RawSampleFormat::I16).unwrap();
        assert_eq!(buf.len(), 6);
        let back = read_samples(&buf[..], RawSampleFormat::I16).unwrap();
        assert_eq!(back, vec![2.0, -32_768.0, 32_767.0]);
    }

    #[test]
    fn file_is_headerless_fixed_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recorded.raw");
        let samples = [-3.0, 1.0, 4.0, -1.0, 5.0, -9.0];
        write_file(&path, &samples, RawSampleFormat::F64).unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 48);
        assert_eq!(read_file(&path, RawSampleFormat::F64).unwrap(), samples);
    }

    #[test]
    fn trailing_partial_sample_is_ignored() {
        let bytes = [0x01u8, 0x00, 0xff];
        assert_eq!(
            read_samples(&bytes[..], RawSampleFormat::I16).unwrap(),
            vec![1.0]
        );
    }

    #[test]
    fn parses_format_names() {
        assert_eq!(RawSampleFormat::parse(" F32 "), Some(RawSampleFormat::F32));
        assert_eq!(RawSampleFormat::parse("s16"), Some(RawSampleFormat::I16));
        assert_eq!(RawSampleFormat::parse("u8"), None);
    }
}

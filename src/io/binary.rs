//! Binary data array transcoding for mzML and sqMass payloads.
//!
//! Encode path: `raw f64 -> [numpress?] -> [zlib?] -> Base64`; the decode
//! path reverses the order. Numpress and zlib are independently
//! toggleable. The 32/64-bit float precision only applies when Numpress is
//! disabled (Numpress defines its own bitstream). Empty input
//! short-circuits to empty output on both paths.

use std::io::{Read, Write};

use base64::prelude::*;
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::numpress::{NumpressCoder, NumpressConfig, NumpressError, NumpressKind};

/// Errors raised while transcoding a binary data array.
#[derive(Debug, thiserror::Error)]
pub enum BinaryCodecError {
    /// Base64 text could not be decoded
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// zlib stream was corrupt or truncated
    #[error("zlib error: {0}")]
    Zlib(#[from] std::io::Error),

    /// Numpress payload was invalid
    #[error("numpress error: {0}")]
    Numpress(#[from] NumpressError),

    /// Raw float payload length is not a multiple of the value size
    #[error("invalid payload length {actual} for {precision}-bit floats")]
    InvalidLength {
        /// Payload length in bytes
        actual: usize,
        /// Configured float width
        precision: u8,
    },
}

/// Float width of a raw (non-Numpress) payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    /// 32-bit little-endian IEEE floats
    Float32,
    /// 64-bit little-endian IEEE floats
    #[default]
    Float64,
}

impl Precision {
    /// Bytes per value.
    pub fn byte_size(&self) -> usize {
        match self {
            Precision::Float32 => 4,
            Precision::Float64 => 8,
        }
    }
}

/// Full per-axis encoding selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryArrayConfig {
    /// Numpress settings; `NumpressKind::None` disables the stage
    pub numpress: NumpressConfig,
    /// Apply zlib after Numpress (or to the raw floats)
    pub zlib: bool,
    /// Raw float width, used only when Numpress is off
    pub precision: Precision,
}

/// How an array was actually encoded, reported by [`encode_array`].
///
/// Numpress may be requested but dropped when round-trip verification
/// fails; the caller needs the effective encoding to emit the correct CV
/// params or compression codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveEncoding {
    /// Numpress stage actually applied
    pub numpress: NumpressKind,
    /// Whether zlib was applied
    pub zlib: bool,
    /// Float width of the payload (meaningful when `numpress` is `None`)
    pub precision: Precision,
}

/// Encode one axis into the raw (pre-Base64) byte payload.
///
/// Returns the payload and the encoding that was actually used; when
/// Numpress verification rejects the data the payload falls back to
/// uncompressed floats of the configured precision.
pub fn encode_array_raw(
    data: &[f64],
    config: &BinaryArrayConfig,
) -> Result<(Vec<u8>, EffectiveEncoding), BinaryCodecError> {
    if data.is_empty() {
        return Ok((
            Vec::new(),
            EffectiveEncoding {
                numpress: NumpressKind::None,
                zlib: config.zlib,
                precision: config.precision,
            },
        ));
    }

    let mut effective = EffectiveEncoding {
        numpress: config.numpress.kind,
        zlib: config.zlib,
        precision: config.precision,
    };

    let mut payload = if config.numpress.kind != NumpressKind::None {
        let numpressed = NumpressCoder::encode(data, &config.numpress)?;
        if numpressed.is_empty() {
            // Verification rejected the encoding; store plain floats.
            effective.numpress = NumpressKind::None;
            effective.precision = Precision::Float64;
            floats_to_bytes(data, Precision::Float64)
        } else {
            numpressed
        }
    } else {
        floats_to_bytes(data, config.precision)
    };

    if config.zlib {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload)?;
        payload = encoder.finish()?;
    }

    Ok((payload, effective))
}

/// Encode one axis to Base64 text for an mzML `<binary>` element.
pub fn encode_array(
    data: &[f64],
    config: &BinaryArrayConfig,
) -> Result<(String, EffectiveEncoding), BinaryCodecError> {
    let (payload, effective) = encode_array_raw(data, config)?;
    if payload.is_empty() {
        return Ok((String::new(), effective));
    }
    Ok((BASE64_STANDARD.encode(payload), effective))
}

/// Decode a raw (already Base64-decoded) payload back into doubles.
pub fn decode_array_raw(
    payload: &[u8],
    numpress: NumpressKind,
    zlib: bool,
    precision: Precision,
) -> Result<Vec<f64>, BinaryCodecError> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    let uncompressed = if zlib {
        let mut decoder = ZlibDecoder::new(payload);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf)?;
        buf
    } else {
        payload.to_vec()
    };

    if numpress != NumpressKind::None {
        return Ok(NumpressCoder::decode(&uncompressed, numpress)?);
    }
    bytes_to_floats(&uncompressed, precision)
}

/// Decode Base64 text from an mzML `<binary>` element back into doubles.
pub fn decode_array(
    base64_text: &str,
    numpress: NumpressKind,
    zlib: bool,
    precision: Precision,
) -> Result<Vec<f64>, BinaryCodecError> {
    let trimmed = base64_text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let payload = BASE64_STANDARD.decode(trimmed)?;
    decode_array_raw(&payload, numpress, zlib, precision)
}

fn floats_to_bytes(data: &[f64], precision: Precision) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() * precision.byte_size());
    match precision {
        Precision::Float32 => {
            for &v in data {
                bytes.extend_from_slice(&(v as f32).to_le_bytes());
            }
        }
        Precision::Float64 => {
            for &v in data {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    bytes
}

fn bytes_to_floats(bytes: &[u8], precision: Precision) -> Result<Vec<f64>, BinaryCodecError> {
    let size = precision.byte_size();
    if bytes.len() % size != 0 {
        return Err(BinaryCodecError::InvalidLength {
            actual: bytes.len(),
            precision: (size * 8) as u8,
        });
    }
    let count = bytes.len() / size;
    let mut values = Vec::with_capacity(count);
    let mut cursor = std::io::Cursor::new(bytes);
    match precision {
        Precision::Float32 => {
            for _ in 0..count {
                values.push(cursor.read_f32::<LittleEndian>()? as f64);
            }
        }
        Precision::Float64 => {
            for _ in 0..count {
                values.push(cursor.read_f64::<LittleEndian>()?);
            }
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(config: &BinaryArrayConfig, data: &[f64]) -> Vec<f64> {
        let (text, effective) = encode_array(data, config).unwrap();
        decode_array(&text, effective.numpress, effective.zlib, effective.precision).unwrap()
    }

    #[test]
    fn plain_float64_roundtrip() {
        let data = vec![100.0, 200.5, 300.25];
        let config = BinaryArrayConfig::default();
        assert_eq!(roundtrip(&config, &data), data);
    }

    #[test]
    fn float32_loses_only_precision() {
        let data = vec![100.123456789, 2e5];
        let config = BinaryArrayConfig {
            precision: Precision::Float32,
            ..Default::default()
        };
        let out = roundtrip(&config, &data);
        assert_eq!(out.len(), 2);
        assert!((out[0] - data[0]).abs() < 1e-3);
    }

    #[test]
    fn zlib_roundtrip() {
        let data: Vec<f64> = (0..512).map(|i| 100.0 + i as f64 * 0.25).collect();
        let config = BinaryArrayConfig {
            zlib: true,
            ..Default::default()
        };
        assert_eq!(roundtrip(&config, &data), data);
    }

    #[test]
    fn numpress_linear_with_zlib_roundtrip() {
        let data: Vec<f64> = (0..64).map(|i| 400.0 + i as f64 * 0.01).collect();
        let config = BinaryArrayConfig {
            numpress: NumpressConfig::with_kind(NumpressKind::Linear),
            zlib: true,
            ..Default::default()
        };
        let out = roundtrip(&config, &data);
        assert_eq!(out.len(), data.len());
        for (a, b) in data.iter().zip(&out) {
            assert!((1.0 - b / a).abs() < 1e-4);
        }
    }

    #[test]
    fn numpress_fallback_reports_effective_encoding() {
        // An impossible tolerance forces the fallback to plain floats.
        let mut numpress = NumpressConfig::with_kind(NumpressKind::Slof);
        numpress.error_tolerance = 1e-15;
        let config = BinaryArrayConfig {
            numpress,
            ..Default::default()
        };
        let data = vec![1.0, 10.0, 1e5];
        let (text, effective) = encode_array(&data, &config).unwrap();
        assert_eq!(effective.numpress, NumpressKind::None);
        assert_eq!(effective.precision, Precision::Float64);
        let out = decode_array(&text, effective.numpress, effective.zlib, effective.precision)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn empty_input_short_circuits() {
        let config = BinaryArrayConfig {
            zlib: true,
            ..Default::default()
        };
        let (text, _) = encode_array(&[], &config).unwrap();
        assert!(text.is_empty());
        assert!(decode_array("", NumpressKind::None, true, Precision::Float64)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn truncated_float_payload_is_rejected() {
        let text = BASE64_STANDARD.encode([0u8; 10]);
        assert!(matches!(
            decode_array(&text, NumpressKind::None, false, Precision::Float64),
            Err(BinaryCodecError::InvalidLength { .. })
        ));
    }
}

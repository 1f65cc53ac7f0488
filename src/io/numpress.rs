//! Numpress numeric compression for MS data arrays.
//!
//! Three encodings over `f64` slices, bitstream-compatible with the
//! reference implementation so that files round-trip across tools:
//!
//! - **linear**: 8-byte little-endian fixed-point header, the first two
//!   values as 4-byte little-endian integers, then nibble-packed
//!   second-difference residuals. Suited to m/z and RT axes.
//! - **pic**: nibble-packed rounded positive integers, absolute error
//!   below 0.5. Suited to intensities.
//! - **slof**: 8-byte fixed-point header followed by 16-bit little-endian
//!   `round(fp * ln(x + 1))` values. Suited to intensities.
//!
//! [`NumpressCoder`] wraps the raw encoders with optional round-trip
//! verification; on excessive accuracy loss it returns an empty buffer and
//! the caller falls back to uncompressed output.

use serde::{Deserialize, Serialize};

/// Errors raised by the raw Numpress encoders/decoders.
#[derive(Debug, thiserror::Error)]
pub enum NumpressError {
    /// Input byte stream too short or otherwise malformed
    #[error("corrupt numpress input: {0}")]
    CorruptInput(&'static str),

    /// A value cannot be represented under the chosen fixed point
    #[error("numpress overflow at index {index}")]
    Overflow {
        /// Index of the offending input value
        index: usize,
    },

    /// Negative input passed to the positive-integer encoding
    #[error("pic encoding requires non-negative values (index {index})")]
    NegativeInput {
        /// Index of the offending input value
        index: usize,
    },
}

/// The Numpress encoding families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NumpressKind {
    /// No numpress compression
    #[default]
    None,
    /// Linear prediction (m/z, RT)
    Linear,
    /// Positive integer rounding (intensity)
    Pic,
    /// Short logged float (intensity)
    Slof,
}

/// Configuration of one Numpress encoding pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NumpressConfig {
    /// Which encoding to apply
    pub kind: NumpressKind,
    /// Fixed point; ignored when `estimate_fixed_point` is set
    pub fixed_point: f64,
    /// Estimate the fixed point from the data
    pub estimate_fixed_point: bool,
    /// Desired absolute mass accuracy for the linear fixed-point estimate;
    /// non-positive disables the accuracy-driven estimate
    pub linear_fp_mass_acc: f64,
    /// Maximum tolerated relative round-trip error; non-positive disables
    /// verification
    pub error_tolerance: f64,
}

impl Default for NumpressConfig {
    fn default() -> Self {
        Self {
            kind: NumpressKind::None,
            fixed_point: 0.0,
            estimate_fixed_point: true,
            linear_fp_mass_acc: -1.0,
            error_tolerance: 1e-4,
        }
    }
}

impl NumpressConfig {
    /// Config for a given kind with fixed-point estimation enabled.
    pub fn with_kind(kind: NumpressKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }
}

const FIXED_POINT_BYTES: usize = 8;
const INT_MAX: i64 = i32::MAX as i64;
const INT_MIN: i64 = i32::MIN as i64;

fn encode_fixed_point(fixed_point: f64, out: &mut Vec<u8>) {
    out.extend_from_slice(&fixed_point.to_le_bytes());
}

fn decode_fixed_point(data: &[u8]) -> Result<f64, NumpressError> {
    let bytes: [u8; 8] = data
        .get(..FIXED_POINT_BYTES)
        .and_then(|s| s.try_into().ok())
        .ok_or(NumpressError::CorruptInput("missing fixed point header"))?;
    Ok(f64::from_le_bytes(bytes))
}

/// Nibble sink that packs half bytes high-first into whole bytes.
struct NibbleWriter {
    out: Vec<u8>,
    pending: Option<u8>,
}

impl NibbleWriter {
    fn new(out: Vec<u8>) -> Self {
        Self { out, pending: None }
    }

    fn push(&mut self, nibble: u8) {
        match self.pending.take() {
            None => self.pending = Some(nibble & 0xf),
            Some(high) => self.out.push((high << 4) | (nibble & 0xf)),
        }
    }

    /// Encode a signed 32-bit value as a count nibble plus value nibbles,
    /// least significant first. The count nibble holds the number of
    /// leading zero nibbles for non-negative values, or 8 plus the number
    /// of leading `0xf` nibbles for negative ones.
    fn push_int(&mut self, x: i32) {
        let bits = x as u32;
        if bits == 0 {
            self.push(8);
            return;
        }
        let leading = if x > 0 {
            let mut l = 0;
            while l < 8 && (bits >> (4 * (7 - l))) & 0xf == 0 {
                l += 1;
            }
            self.push(l as u8);
            l
        } else {
            // Cap at 7 so -1 still carries one value nibble.
            let mut l = 0;
            while l < 7 && (bits >> (4 * (7 - l))) & 0xf == 0xf {
                l += 1;
            }
            self.push(l as u8 + 8);
            l
        };
        for i in 0..(8 - leading) {
            self.push(((bits >> (4 * i)) & 0xf) as u8);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if let Some(high) = self.pending.take() {
            self.out.push(high << 4);
        }
        self.out
    }
}

/// Nibble source reading half bytes high-first.
struct NibbleReader<'a> {
    data: &'a [u8],
    byte: usize,
    half: bool,
}

impl<'a> NibbleReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte: 0,
            half: false,
        }
    }

    /// True when only a zero padding nibble remains.
    fn at_padding(&self) -> bool {
        self.byte + 1 == self.data.len() && self.half && self.data[self.byte] & 0xf == 0
    }

    fn exhausted(&self) -> bool {
        self.byte >= self.data.len()
    }

    fn next(&mut self) -> Result<u8, NumpressError> {
        if self.byte >= self.data.len() {
            return Err(NumpressError::CorruptInput("nibble index out of range"));
        }
        let b = self.data[self.byte];
        let nibble = if self.half {
            self.byte += 1;
            b & 0xf
        } else {
            b >> 4
        };
        self.half = !self.half;
        Ok(nibble)
    }

    fn next_int(&mut self) -> Result<i32, NumpressError> {
        let head = self.next()?;
        let (leading, mut value) = if head <= 8 {
            (head as usize, 0u32)
        } else {
            let n = (head - 8) as usize;
            let mut v = 0u32;
            for i in 0..n {
                v |= 0xf << (4 * (7 - i));
            }
            (n, v)
        };
        if leading == 8 {
            return Ok(value as i32);
        }
        for i in 0..(8 - leading) {
            let nibble = self.next()? as u32;
            value |= nibble << (4 * i);
        }
        Ok(value as i32)
    }
}

/// Largest fixed point such that all second-difference residuals fit the
/// 32-bit residual encoding. Returns 0 for empty input.
pub fn optimal_linear_fixed_point(data: &[f64]) -> f64 {
    match data.len() {
        0 => 0.0,
        1 => (INT_MAX as f64 / data[0]).floor(),
        _ => {
            let mut max_val = data[0].max(data[1]);
            for i in 2..data.len() {
                let extrapol = data[i - 1] + (data[i - 1] - data[i - 2]);
                let diff = data[i] - extrapol;
                max_val = max_val.max((diff.abs() + 1.0).ceil());
            }
            (INT_MAX as f64 / max_val).floor()
        }
    }
}

/// Fixed point achieving a requested absolute mass accuracy, or `None` when
/// that accuracy cannot be represented without overflowing the residual
/// encoding. The caller falls back to [`optimal_linear_fixed_point`].
pub fn optimal_linear_fixed_point_mass(data: &[f64], mass_acc: f64) -> Option<f64> {
    if data.len() < 3 || mass_acc <= 0.0 {
        return None;
    }
    // Integer rounding contributes up to 0.5 of one fixed-point unit.
    let fp = 0.5 / mass_acc;
    if fp > optimal_linear_fixed_point(data) {
        return None;
    }
    Some(fp)
}

/// Largest fixed point mapping `ln(max + 1)` onto the 16-bit slof range.
pub fn optimal_slof_fixed_point(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut max_val = 1.0f64;
    for &x in data {
        max_val = max_val.max((x + 1.0).ln());
    }
    (u16::MAX as f64 / max_val).floor()
}

/// Encode with the linear predictor under the given fixed point.
pub fn encode_linear(data: &[f64], fixed_point: f64) -> Result<Vec<u8>, NumpressError> {
    let mut out = Vec::with_capacity(data.len() * 5 + 16);
    encode_fixed_point(fixed_point, &mut out);
    if data.is_empty() {
        return Ok(out);
    }

    let to_fixed = |x: f64, index: usize| -> Result<i64, NumpressError> {
        let scaled = x * fixed_point + 0.5;
        if scaled > i64::MAX as f64 || scaled < i64::MIN as f64 {
            return Err(NumpressError::Overflow { index });
        }
        Ok(scaled as i64)
    };

    let mut prev2 = to_fixed(data[0], 0)?;
    out.extend_from_slice(&(prev2 as u32).to_le_bytes());
    if data.len() == 1 {
        return Ok(out);
    }
    let mut prev1 = to_fixed(data[1], 1)?;
    out.extend_from_slice(&(prev1 as u32).to_le_bytes());

    let mut nibbles = NibbleWriter::new(out);
    for (i, &x) in data.iter().enumerate().skip(2) {
        let current = to_fixed(x, i)?;
        let extrapol = prev1 + (prev1 - prev2);
        let diff = current - extrapol;
        if diff > INT_MAX || diff < INT_MIN {
            return Err(NumpressError::Overflow { index: i });
        }
        nibbles.push_int(diff as i32);
        prev2 = prev1;
        prev1 = current;
    }
    Ok(nibbles.finish())
}

/// Decode a linear-encoded byte stream.
pub fn decode_linear(data: &[u8]) -> Result<Vec<f64>, NumpressError> {
    if data.len() == FIXED_POINT_BYTES {
        return Ok(Vec::new());
    }
    if data.len() < FIXED_POINT_BYTES {
        return Err(NumpressError::CorruptInput(
            "not enough bytes to read fixed point",
        ));
    }
    let fixed_point = decode_fixed_point(data)?;
    if fixed_point == 0.0 || !fixed_point.is_finite() {
        return Err(NumpressError::CorruptInput("invalid fixed point"));
    }

    let read_u32 = |offset: usize| -> Result<i64, NumpressError> {
        let bytes: [u8; 4] = data
            .get(offset..offset + 4)
            .and_then(|s| s.try_into().ok())
            .ok_or(NumpressError::CorruptInput("truncated initial value"))?;
        Ok(u32::from_le_bytes(bytes) as i64)
    };

    let mut out = Vec::with_capacity(data.len() * 2);
    let mut prev2 = read_u32(8)?;
    out.push(prev2 as f64 / fixed_point);
    if data.len() == 12 {
        return Ok(out);
    }
    let mut prev1 = read_u32(12)?;
    out.push(prev1 as f64 / fixed_point);

    let mut nibbles = NibbleReader::new(&data[16..]);
    while !nibbles.exhausted() {
        if nibbles.at_padding() {
            break;
        }
        let diff = nibbles.next_int()? as i64;
        let value = prev1 + (prev1 - prev2) + diff;
        out.push(value as f64 / fixed_point);
        prev2 = prev1;
        prev1 = value;
    }
    Ok(out)
}

/// Encode non-negative values as rounded nibble-packed integers.
pub fn encode_pic(data: &[f64]) -> Result<Vec<u8>, NumpressError> {
    let mut nibbles = NibbleWriter::new(Vec::with_capacity(data.len() * 5));
    for (index, &x) in data.iter().enumerate() {
        if x < -0.5 {
            return Err(NumpressError::NegativeInput { index });
        }
        let rounded = x + 0.5;
        if rounded > INT_MAX as f64 {
            return Err(NumpressError::Overflow { index });
        }
        nibbles.push_int(rounded as i32);
    }
    Ok(nibbles.finish())
}

/// Decode a pic-encoded byte stream.
pub fn decode_pic(data: &[u8]) -> Result<Vec<f64>, NumpressError> {
    let mut nibbles = NibbleReader::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    while !nibbles.exhausted() {
        if nibbles.at_padding() {
            break;
        }
        out.push(nibbles.next_int()? as f64);
    }
    Ok(out)
}

/// Encode with the short-logged-float scheme under the given fixed point.
pub fn encode_slof(data: &[f64], fixed_point: f64) -> Result<Vec<u8>, NumpressError> {
    let mut out = Vec::with_capacity(data.len() * 2 + FIXED_POINT_BYTES);
    encode_fixed_point(fixed_point, &mut out);
    for (index, &x) in data.iter().enumerate() {
        let scaled = (x + 1.0).ln() * fixed_point + 0.5;
        if !(0.0..=u16::MAX as f64).contains(&scaled) {
            return Err(NumpressError::Overflow { index });
        }
        out.extend_from_slice(&(scaled as u16).to_le_bytes());
    }
    Ok(out)
}

/// Decode a slof-encoded byte stream.
pub fn decode_slof(data: &[u8]) -> Result<Vec<f64>, NumpressError> {
    if data.len() < FIXED_POINT_BYTES {
        return Err(NumpressError::CorruptInput(
            "not enough bytes to read fixed point",
        ));
    }
    let fixed_point = decode_fixed_point(data)?;
    if fixed_point == 0.0 || !fixed_point.is_finite() {
        return Err(NumpressError::CorruptInput("invalid fixed point"));
    }
    let payload = &data[FIXED_POINT_BYTES..];
    let mut out = Vec::with_capacity(payload.len() / 2);
    for chunk in payload.chunks_exact(2) {
        let x = u16::from_le_bytes([chunk[0], chunk[1]]) as f64;
        out.push((x / fixed_point).exp() - 1.0);
    }
    Ok(out)
}

/// Verifying front end over the raw encoders.
#[derive(Debug, Clone, Default)]
pub struct NumpressCoder;

impl NumpressCoder {
    /// Encode `data` according to `config`, verifying the round trip when a
    /// positive error tolerance is configured.
    ///
    /// Returns an empty vector when the configured kind is `None`, when the
    /// input is empty, or when verification detects excessive accuracy
    /// loss; in the last case the first offending index is logged and the
    /// caller is expected to fall back to uncompressed output.
    pub fn encode(data: &[f64], config: &NumpressConfig) -> Result<Vec<u8>, NumpressError> {
        if data.is_empty() || config.kind == NumpressKind::None {
            return Ok(Vec::new());
        }

        let encoded = match config.kind {
            NumpressKind::Linear => {
                let fixed_point = if config.estimate_fixed_point {
                    if config.linear_fp_mass_acc > 0.0 {
                        optimal_linear_fixed_point_mass(data, config.linear_fp_mass_acc)
                            .unwrap_or_else(|| optimal_linear_fixed_point(data))
                    } else {
                        optimal_linear_fixed_point(data)
                    }
                } else {
                    config.fixed_point
                };
                encode_linear(data, fixed_point)?
            }
            NumpressKind::Pic => encode_pic(data)?,
            NumpressKind::Slof => {
                let fixed_point = if config.estimate_fixed_point {
                    optimal_slof_fixed_point(data)
                } else {
                    config.fixed_point
                };
                encode_slof(data, fixed_point)?
            }
            NumpressKind::None => unreachable!(),
        };

        if config.error_tolerance > 0.0 {
            let decoded = match config.kind {
                NumpressKind::Linear => decode_linear(&encoded)?,
                NumpressKind::Pic => decode_pic(&encoded)?,
                NumpressKind::Slof => decode_slof(&encoded)?,
                NumpressKind::None => unreachable!(),
            };
            if let Some(bad) = Self::first_verification_failure(
                data,
                &decoded,
                config.kind,
                config.error_tolerance,
            ) {
                log::warn!(
                    "numpress {:?} verification failed at index {bad}; \
                     falling back to uncompressed output",
                    config.kind
                );
                return Ok(Vec::new());
            }
        }

        Ok(encoded)
    }

    /// Decode `data` according to the configured kind.
    pub fn decode(data: &[u8], kind: NumpressKind) -> Result<Vec<f64>, NumpressError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match kind {
            NumpressKind::None => Ok(Vec::new()),
            NumpressKind::Linear => decode_linear(data),
            NumpressKind::Pic => decode_pic(data),
            NumpressKind::Slof => decode_slof(data),
        }
    }

    fn first_verification_failure(
        input: &[f64],
        decoded: &[f64],
        kind: NumpressKind,
        tolerance: f64,
    ) -> Option<usize> {
        if decoded.len() != input.len() {
            return Some(decoded.len().min(input.len()));
        }
        for (i, (&d, &u)) in input.iter().zip(decoded.iter()).enumerate() {
            if !u.is_finite() || !d.is_finite() {
                return Some(i);
            }
            if kind == NumpressKind::Pic {
                // Integer rounding; absolute accuracy is +/- 0.5.
                if (d - u).abs() >= 1.0 {
                    return Some(i);
                }
            } else if d == 0.0 {
                if u.abs() > tolerance {
                    return Some(i);
                }
            } else if u == 0.0 {
                if d.abs() > tolerance {
                    return Some(i);
                }
            } else if (1.0 - d / u).abs() > tolerance {
                return Some(i);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_relative_roundtrip(data: &[f64], decoded: &[f64], tol: f64) {
        assert_eq!(data.len(), decoded.len());
        for (&d, &u) in data.iter().zip(decoded) {
            if d == 0.0 {
                assert!(u.abs() <= tol, "{u} not within {tol} of zero");
            } else {
                assert!((1.0 - u / d).abs() <= tol, "{u} vs {d}");
            }
        }
    }

    #[test]
    fn linear_roundtrip_exact_on_integers() {
        // Integer m/z values hit the estimated fixed point exactly.
        let data: Vec<f64> = (0..15).map(|i| i as f64).collect();
        let fp = optimal_linear_fixed_point(&data);
        let encoded = encode_linear(&data, fp).unwrap();
        let decoded = decode_linear(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn linear_roundtrip_mz_like() {
        let data = vec![400.0017, 400.5123, 401.0444, 402.0001, 403.5999, 500.0];
        let fp = optimal_linear_fixed_point(&data);
        let encoded = encode_linear(&data, fp).unwrap();
        let decoded = decode_linear(&encoded).unwrap();
        assert_relative_roundtrip(&data, &decoded, 1e-6);
    }

    #[test]
    fn linear_short_inputs() {
        for n in 0..3 {
            let data: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
            let fp = if data.is_empty() {
                1000.0
            } else {
                optimal_linear_fixed_point(&data)
            };
            let encoded = encode_linear(&data, fp).unwrap();
            let decoded = decode_linear(&encoded).unwrap();
            assert_eq!(decoded.len(), data.len());
        }
    }

    #[test]
    fn linear_fixed_point_mass_infeasible_returns_none() {
        // Huge jumps force a small overflow-safe fixed point; a tight mass
        // accuracy cannot be honoured.
        let data = vec![0.0, 1.0e9, 0.0, 1.0e9, 0.0];
        assert!(optimal_linear_fixed_point_mass(&data, 1e-9).is_none());
        assert!(optimal_linear_fixed_point_mass(&data, -1.0).is_none());
    }

    #[test]
    fn pic_roundtrip_within_half() {
        let data = vec![0.0, 1.0, 2.5, 1000.7, 65535.2, 123456.0];
        let encoded = encode_pic(&data).unwrap();
        let decoded = decode_pic(&encoded).unwrap();
        assert_eq!(decoded.len(), data.len());
        for (&d, &u) in data.iter().zip(&decoded) {
            assert!((d - u).abs() < 1.0, "{d} vs {u}");
        }
    }

    #[test]
    fn pic_rejects_negative() {
        assert!(matches!(
            encode_pic(&[1.0, -3.0]),
            Err(NumpressError::NegativeInput { index: 1 })
        ));
    }

    #[test]
    fn slof_roundtrip_relative() {
        let data = vec![0.0, 1.0, 10.0, 1e4, 1e6, 5e7];
        let fp = optimal_slof_fixed_point(&data);
        let encoded = encode_slof(&data, fp).unwrap();
        let decoded = decode_slof(&encoded).unwrap();
        // ln-domain quantisation: generous relative tolerance.
        assert_relative_roundtrip(&data, &decoded, 5e-3);
    }

    #[test]
    fn coder_falls_back_to_empty_on_impossible_tolerance() {
        let config = NumpressConfig {
            kind: NumpressKind::Slof,
            error_tolerance: 1e-12,
            ..Default::default()
        };
        let out = NumpressCoder::encode(&[1.0, 2.7, 3.9, 1e6], &config).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn coder_verified_linear_roundtrip() {
        let config = NumpressConfig {
            kind: NumpressKind::Linear,
            error_tolerance: 1e-4,
            ..Default::default()
        };
        let data = vec![100.0, 100.5, 101.2, 102.0, 104.5];
        let out = NumpressCoder::encode(&data, &config).unwrap();
        assert!(!out.is_empty());
        let back = NumpressCoder::decode(&out, NumpressKind::Linear).unwrap();
        assert_relative_roundtrip(&data, &back, 1e-4);
    }

    #[test]
    fn decode_rejects_truncated_header() {
        assert!(decode_linear(&[1, 2, 3]).is_err());
        assert!(decode_slof(&[1, 2, 3]).is_err());
    }

    #[test]
    fn negative_residuals_roundtrip() {
        // Strictly decreasing data produces negative second differences at
        // the turning points.
        let data = vec![10.0, 9.0, 7.5, 7.0, 8.0, 4.0];
        let fp = optimal_linear_fixed_point(&data);
        let encoded = encode_linear(&data, fp).unwrap();
        let decoded = decode_linear(&encoded).unwrap();
        assert_relative_roundtrip(&data, &decoded, 1e-6);
    }
}

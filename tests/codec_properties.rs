//! Property tests for the Numpress codec laws.

use proptest::prelude::*;

use mzproc::io::numpress::{
    decode_linear, decode_pic, decode_slof, encode_linear, encode_pic, encode_slof,
    optimal_linear_fixed_point, optimal_slof_fixed_point, NumpressCoder, NumpressConfig,
    NumpressKind,
};

/// Relative round-trip check with zero-safe handling of either side.
fn within_relative_tolerance(input: &[f64], decoded: &[f64], tolerance: f64) -> bool {
    input.len() == decoded.len()
        && input.iter().zip(decoded).all(|(&d, &u)| {
            if d == 0.0 {
                u.abs() <= tolerance
            } else if u == 0.0 {
                d.abs() <= tolerance
            } else {
                (1.0 - u / d).abs() <= tolerance
            }
        })
}

proptest! {
    #[test]
    fn linear_roundtrip_within_tolerance(
        data in prop::collection::vec(0.0f64..2000.0, 1..200)
    ) {
        let tolerance = 1e-4;
        let config = NumpressConfig {
            kind: NumpressKind::Linear,
            error_tolerance: tolerance,
            ..Default::default()
        };
        let encoded = NumpressCoder::encode(&data, &config).unwrap();
        if !encoded.is_empty() {
            let decoded = NumpressCoder::decode(&encoded, NumpressKind::Linear).unwrap();
            // Tiny slack: the encoder verifies in/out, the law checks out/in.
            prop_assert!(within_relative_tolerance(&data, &decoded, tolerance * 1.001));
        }
    }

    #[test]
    fn linear_raw_roundtrip_preserves_length(
        data in prop::collection::vec(0.0f64..2000.0, 0..100)
    ) {
        let fp = if data.is_empty() { 1000.0 } else { optimal_linear_fixed_point(&data) };
        let encoded = encode_linear(&data, fp).unwrap();
        let decoded = decode_linear(&encoded).unwrap();
        prop_assert_eq!(decoded.len(), data.len());
    }

    #[test]
    fn pic_roundtrip_within_half_unit(
        data in prop::collection::vec(0.0f64..1.0e6, 1..200)
    ) {
        let encoded = encode_pic(&data).unwrap();
        let decoded = decode_pic(&encoded).unwrap();
        prop_assert_eq!(decoded.len(), data.len());
        for (d, u) in data.iter().zip(&decoded) {
            prop_assert!((d - u).abs() < 1.0, "{} vs {}", d, u);
        }
    }

    #[test]
    fn slof_roundtrip_within_tolerance(
        data in prop::collection::vec(0.0f64..1.0e8, 1..200)
    ) {
        let fp = optimal_slof_fixed_point(&data);
        let encoded = encode_slof(&data, fp).unwrap();
        let decoded = decode_slof(&encoded).unwrap();
        // ln-domain quantisation bounds the relative error by the step of
        // the 16-bit grid.
        prop_assert!(within_relative_tolerance(&data, &decoded, 5e-3));
    }

    #[test]
    fn verifying_coder_never_exceeds_tolerance(
        data in prop::collection::vec(0.0f64..1.0e7, 1..100),
        tolerance in 1e-6f64..1e-2
    ) {
        let config = NumpressConfig {
            kind: NumpressKind::Slof,
            error_tolerance: tolerance,
            ..Default::default()
        };
        let encoded = NumpressCoder::encode(&data, &config).unwrap();
        // Either the encoder verified the round trip or it backed out.
        if !encoded.is_empty() {
            let decoded = NumpressCoder::decode(&encoded, NumpressKind::Slof).unwrap();
            prop_assert!(within_relative_tolerance(&data, &decoded, tolerance * 1.001));
        }
    }
}

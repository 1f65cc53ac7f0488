//! End-to-end pipeline tests: write, read back, convert and correct.

use std::collections::BTreeSet;

use mzproc::algo::precursor::{correct_to_nearest_ms1_peak, CorrectionRecord};
use mzproc::algo::{
    ExtrapolationType, InterpolatedModel, InterpolationType, StablePairFinder,
    TransformationDescription, TransformationModel,
};
use mzproc::io::mzml::{load_experiment, transfer, MzMLWriter};
use mzproc::io::numpress::{decode_linear, encode_linear, optimal_linear_fixed_point};
use mzproc::io::numpress::{NumpressConfig, NumpressKind};
use mzproc::io::sqmass::SqMassWriter;
use mzproc::io::{MsDataConsumer, PeakFileOptions};
use mzproc::model::{
    Chromatogram, ChromatogramPoint, ConsensusMap, Experiment, ExperimentalSettings, Feature,
    FeatureMap, Peak1D, Precursor, Spectrum,
};

fn sample_experiment() -> Experiment {
    let mut exp = Experiment {
        settings: ExperimentalSettings {
            run_id: "pipeline-run".into(),
            source_file: Some("input.raw".into()),
            ..Default::default()
        },
        ..Default::default()
    };

    for i in 0..5 {
        let mut ms1 = Spectrum::new(format!("scan={}", 2 * i + 1), 1, 10.0 * i as f64);
        ms1.peaks = (0..20)
            .map(|k| Peak1D {
                mz: 400.0 + k as f64 + 0.001 * i as f64,
                intensity: 100.0 + k as f32,
            })
            .collect();
        exp.spectra.push(ms1);

        let mut ms2 = Spectrum::new(format!("scan={}", 2 * i + 2), 2, 10.0 * i as f64 + 5.0);
        ms2.precursors.push(Precursor {
            mz: 405.0008 + 0.001 * i as f64,
            charge: Some(2),
            ..Default::default()
        });
        ms2.peaks = vec![Peak1D {
            mz: 200.0,
            intensity: 50.0,
        }];
        exp.spectra.push(ms2);
    }

    let mut tic = Chromatogram::new("TIC");
    tic.points = (0..5)
        .map(|i| ChromatogramPoint {
            rt: 10.0 * i as f64,
            intensity: 1000.0,
        })
        .collect();
    exp.chromatograms.push(tic);
    exp
}

fn write_mzml(exp: &Experiment, path: &std::path::Path, options: PeakFileOptions) {
    let mut writer = MzMLWriter::create(path, options).unwrap();
    writer.set_experimental_settings(&exp.settings);
    writer.set_expected_size(exp.spectra.len(), exp.chromatograms.len());
    for spectrum in &exp.spectra {
        writer.consume_spectrum(spectrum.clone()).unwrap();
    }
    for chromatogram in &exp.chromatograms {
        writer.consume_chromatogram(chromatogram.clone()).unwrap();
    }
    writer.close().unwrap();
}

#[test]
fn numpress_linear_integer_grid_roundtrips_exactly() {
    // 15 m/z values 0..=14 with intensities 15..=1: integer inputs hit the
    // estimated fixed point exactly.
    let mzs: Vec<f64> = (0..15).map(|i| i as f64).collect();
    let fp = optimal_linear_fixed_point(&mzs);
    let encoded = encode_linear(&mzs, fp).unwrap();
    let decoded = decode_linear(&encoded).unwrap();
    assert_eq!(decoded, mzs);
}

#[test]
fn mzml_file_roundtrip_preserves_experiment() {
    let exp = sample_experiment();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roundtrip.mzML");
    write_mzml(&exp, &path, PeakFileOptions::default());

    let back = load_experiment(&path).unwrap();
    assert_eq!(back.spectra.len(), exp.spectra.len());
    assert_eq!(back.chromatograms.len(), 1);
    assert_eq!(back.settings.run_id, "pipeline-run");
    for (a, b) in exp.spectra.iter().zip(&back.spectra) {
        assert_eq!(a.native_id, b.native_id);
        assert_eq!(a.ms_level, b.ms_level);
        assert_eq!(a.peaks.len(), b.peaks.len());
        assert!((a.rt - b.rt).abs() < 1e-6);
        for (pa, pb) in a.peaks.iter().zip(&b.peaks) {
            assert!((pa.mz - pb.mz).abs() < 1e-9);
        }
    }

    // Indexed layout: trailing index, offset and checksum.
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("<indexList"));
    assert!(text.contains("<indexListOffset>"));
    assert!(text.contains("<fileChecksum>"));
}

#[test]
fn mzml_numpress_roundtrip_stays_within_tolerance() {
    let exp = sample_experiment();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("numpress.mzML");

    let mut options = PeakFileOptions::default();
    options.zlib_compression = true;
    options.numpress_mass_time = NumpressConfig::with_kind(NumpressKind::Linear);
    options.numpress_intensity = NumpressConfig::with_kind(NumpressKind::Slof);
    write_mzml(&exp, &path, options);

    let back = load_experiment(&path).unwrap();
    for (a, b) in exp.spectra.iter().zip(&back.spectra) {
        for (pa, pb) in a.peaks.iter().zip(&b.peaks) {
            assert!((1.0 - pb.mz / pa.mz).abs() < 1e-4);
            let (ia, ib) = (pa.intensity as f64, pb.intensity as f64);
            assert!((1.0 - ib / ia).abs() < 1e-2);
        }
    }
}

#[test]
fn mzml_to_sqmass_conversion_via_consumer_chain() {
    let exp = sample_experiment();
    let dir = tempfile::tempdir().unwrap();
    let mzml_path = dir.path().join("in.mzML");
    write_mzml(&exp, &mzml_path, PeakFileOptions::default());

    let sq_path = dir.path().join("out.sqMass");
    let options = PeakFileOptions {
        pool_size: 3,
        ..Default::default()
    };
    {
        let mut writer = SqMassWriter::create(&sq_path, options.clone()).unwrap();
        writer.store_metadata_blob(true);
        let (n_spectra, n_chromatograms) = transfer(&mzml_path, &mut writer, &options).unwrap();
        assert_eq!(n_spectra, 10);
        assert_eq!(n_chromatograms, 1);
    }

    let conn = rusqlite::Connection::open(&sq_path).unwrap();
    let n_spectra: i64 = conn
        .query_row("SELECT COUNT(*) FROM SPECTRUM", [], |r| r.get(0))
        .unwrap();
    assert_eq!(n_spectra, 10);
    let n_chroms: i64 = conn
        .query_row("SELECT COUNT(*) FROM CHROMATOGRAM", [], |r| r.get(0))
        .unwrap();
    assert_eq!(n_chroms, 1);
    let n_precursors: i64 = conn
        .query_row("SELECT COUNT(*) FROM PRECURSOR WHERE SPECTRUM_ID IS NOT NULL", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(n_precursors, 5);
    // One blob per axis per item.
    let n_data: i64 = conn
        .query_row("SELECT COUNT(*) FROM DATA", [], |r| r.get(0))
        .unwrap();
    assert_eq!(n_data, 22);
}

#[test]
fn stable_pairing_of_identical_maps_is_perfect() {
    let features: Vec<Feature> = (0..6)
        .map(|i| Feature {
            id: i,
            rt: 100.0 + 50.0 * i as f64,
            mz: 400.0 + 10.0 * i as f64,
            intensity: 1000.0,
            charge: 2,
            quality: 0.0,
            rt_range: (0.0, 0.0),
            peptide_sequences: Vec::new(),
        })
        .collect();
    let map = FeatureMap { features };
    let map0 = ConsensusMap::from_feature_map(0, &map);
    let map1 = ConsensusMap::from_feature_map(1, &map);

    let result = StablePairFinder::default().run(&[map0, map1]).unwrap();
    assert_eq!(result.len(), 6);
    for cf in &result.features {
        assert_eq!(cf.len(), 2);
        assert!((cf.quality - 1.0).abs() < 1e-9);
    }
}

#[test]
fn interpolated_model_scenario_values() {
    let data = vec![(0.0, 0.0), (1.0, 1.0), (2.0, 4.0), (3.0, 9.0), (4.0, 16.0)];
    let model = InterpolatedModel::new(
        &data,
        InterpolationType::CubicSpline,
        ExtrapolationType::FourPointLinear,
    )
    .unwrap();
    assert!((model.evaluate(2.0) - 4.0).abs() < 1e-9);
    assert!((model.evaluate(-1.0) - -1.0).abs() < 1e-9);
    assert!((model.evaluate(5.0) - 23.0).abs() < 1e-9);
}

#[test]
fn transformation_description_json_roundtrip() {
    let data = vec![(0.0, 1.0), (10.0, 12.0), (20.0, 23.0), (30.0, 34.0)];
    let model = InterpolatedModel::new(
        &data,
        InterpolationType::Linear,
        ExtrapolationType::TwoPointLinear,
    )
    .unwrap();
    let description = TransformationDescription {
        model: TransformationModel::Interpolated(model),
        data,
    };

    let json = serde_json::to_string(&description).unwrap();
    let back: TransformationDescription = serde_json::from_str(&json).unwrap();
    for x in [-5.0, 0.0, 7.5, 15.0, 30.0, 40.0] {
        assert!((description.model.evaluate(x) - back.model.evaluate(x)).abs() < 1e-12);
    }
}

#[test]
fn precursor_correction_end_to_end_through_mzml() {
    let exp = sample_experiment();
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("uncorrected.mzML");
    write_mzml(&exp, &in_path, PeakFileOptions::default());

    let mut loaded = load_experiment(&in_path).unwrap();
    let mut records: Vec<CorrectionRecord> = Vec::new();
    // Precursors sit 0.8 mDa off the 405-series peaks; 5 ppm (~2 mDa)
    // reaches them.
    let corrected = correct_to_nearest_ms1_peak(&mut loaded, 5.0, true, &mut records);
    let expected: BTreeSet<usize> = (0..5).map(|i| 2 * i + 1).collect();
    assert_eq!(corrected, expected);
    assert_eq!(records.len(), 5);
    for record in &records {
        assert!(record.delta_mz().abs() > 0.0);
        assert!(record.delta_mz().abs() < 2e-3);
    }

    // Write the corrected run and confirm the new values survive a read.
    let out_path = dir.path().join("corrected.mzML");
    write_mzml(&loaded, &out_path, PeakFileOptions::default());
    let reread = load_experiment(&out_path).unwrap();
    for i in 0..5 {
        let precursor = &reread.spectra[2 * i + 1].precursors[0];
        let ms1_peak = 405.0 + 0.001 * i as f64;
        assert!((precursor.mz - ms1_peak).abs() < 1e-9);
    }
}

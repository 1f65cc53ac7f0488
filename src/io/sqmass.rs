//! sqMass embedded store: spectra and chromatograms in a single-file
//! SQLite database.
//!
//! One connection per writer, owned exclusively. Inserts are batched: items
//! accumulate up to the configured pool size and are flushed inside a
//! single transaction with bulk-insert pragmas applied
//! (`synchronous=OFF`, `journal_mode=OFF`). The `DATA.data` blob is exactly
//! the byte output of the codec chain for that axis; the `compression` and
//! `data_type` columns use the integer codes pinned below.

use std::path::Path;

use rusqlite::{params, Connection};

use crate::io::binary::{encode_array_raw, BinaryArrayConfig, EffectiveEncoding, Precision};
use crate::io::consumer::{ConsumerError, MsDataConsumer};
use crate::io::numpress::NumpressKind;
use crate::io::options::PeakFileOptions;
use crate::model::{Chromatogram, ExperimentalSettings, Spectrum};

/// Errors raised by the sqMass back-end.
#[derive(Debug, thiserror::Error)]
pub enum SqMassError {
    /// SQLite failure
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Metadata blob serialisation failure
    #[error("metadata serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<SqMassError> for ConsumerError {
    fn from(e: SqMassError) -> Self {
        ConsumerError::Backend(e.to_string())
    }
}

impl From<rusqlite::Error> for ConsumerError {
    fn from(e: rusqlite::Error) -> Self {
        ConsumerError::Backend(format!("sqlite error: {e}"))
    }
}

/// On-disk compression codes of the `DATA.compression` column.
///
/// The codes are pinned here rather than derived from configuration; they
/// are the values observed on disk and must not drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum SqMassCompression {
    /// Raw little-endian doubles
    None = 0,
    /// zlib over raw doubles
    Zlib = 1,
    /// MS-Numpress linear
    NumpressLinear = 5,
    /// MS-Numpress pic
    NumpressPic = 6,
    /// MS-Numpress slof
    NumpressSlof = 8,
}

impl SqMassCompression {
    fn from_effective(effective: &EffectiveEncoding) -> Self {
        match effective.numpress {
            NumpressKind::Linear => SqMassCompression::NumpressLinear,
            NumpressKind::Pic => SqMassCompression::NumpressPic,
            NumpressKind::Slof => SqMassCompression::NumpressSlof,
            NumpressKind::None => {
                if effective.zlib {
                    SqMassCompression::Zlib
                } else {
                    SqMassCompression::None
                }
            }
        }
    }
}

/// On-disk axis codes of the `DATA.data_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum SqMassDataType {
    /// m/z axis
    Mz = 0,
    /// intensity axis
    Intensity = 1,
    /// retention time axis
    Rt = 2,
}

const SQMASS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS RUN (
    ID INT PRIMARY KEY NOT NULL,
    FILENAME TEXT,
    NATIVE_ID TEXT,
    SAMPLE_NAME TEXT
);
CREATE TABLE IF NOT EXISTS RUN_EXTRA (
    RUN_ID INT,
    DATA BLOB
);
CREATE TABLE IF NOT EXISTS SPECTRUM (
    ID INT PRIMARY KEY NOT NULL,
    RUN_ID INT,
    NATIVE_ID TEXT NOT NULL,
    MSLEVEL INT,
    SCAN_POLARITY INT,
    RETENTION_TIME REAL
);
CREATE TABLE IF NOT EXISTS CHROMATOGRAM (
    ID INT PRIMARY KEY NOT NULL,
    RUN_ID INT,
    NATIVE_ID TEXT NOT NULL,
    PRECURSOR_MZ REAL,
    PRODUCT_MZ REAL
);
CREATE TABLE IF NOT EXISTS PRECURSOR (
    SPECTRUM_ID INT,
    CHROMATOGRAM_ID INT,
    CHARGE INT,
    ISOLATION_TARGET REAL,
    ISOLATION_LOWER REAL,
    ISOLATION_UPPER REAL
);
CREATE TABLE IF NOT EXISTS PRODUCT (
    SPECTRUM_ID INT,
    CHROMATOGRAM_ID INT,
    ISOLATION_TARGET REAL,
    ISOLATION_LOWER REAL,
    ISOLATION_UPPER REAL
);
CREATE TABLE IF NOT EXISTS DATA (
    SPECTRUM_ID INT,
    CHROMATOGRAM_ID INT,
    DATA_TYPE INT,
    COMPRESSION INT,
    DATA BLOB
);
";

/// Writing consumer backed by a single-file sqMass database.
pub struct SqMassWriter {
    conn: Connection,
    options: PeakFileOptions,
    settings: ExperimentalSettings,
    store_metadata_blob: bool,
    run_row_written: bool,
    writing_chromatograms: bool,
    closed: bool,
    next_spectrum_id: i64,
    next_chromatogram_id: i64,
    spectra_expected: usize,
    chromatograms_expected: usize,
    spectrum_buffer: Vec<Spectrum>,
    chromatogram_buffer: Vec<Chromatogram>,
}

const RUN_ID: i64 = 1;

impl SqMassWriter {
    /// Create or open a sqMass file at `path` for writing.
    pub fn create(path: impl AsRef<Path>, options: PeakFileOptions) -> Result<Self, SqMassError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "PRAGMA synchronous=OFF;
             PRAGMA journal_mode=OFF;
             PRAGMA temp_store=MEMORY;
             PRAGMA cache_size=-100000;",
        )?;
        conn.execute_batch(SQMASS_SCHEMA)?;
        Ok(Self {
            conn,
            options,
            settings: ExperimentalSettings::default(),
            store_metadata_blob: false,
            run_row_written: false,
            writing_chromatograms: false,
            closed: false,
            next_spectrum_id: 0,
            next_chromatogram_id: 0,
            spectra_expected: 0,
            chromatograms_expected: 0,
            spectrum_buffer: Vec::new(),
            chromatogram_buffer: Vec::new(),
        })
    }

    /// Also store the JSON-serialised experimental settings in `RUN_EXTRA`.
    pub fn store_metadata_blob(&mut self, enable: bool) {
        self.store_metadata_blob = enable;
    }

    /// Number of spectra inserted or currently buffered.
    pub fn spectra_written(&self) -> usize {
        self.next_spectrum_id as usize + self.spectrum_buffer.len()
    }

    /// Number of chromatograms inserted or currently buffered.
    pub fn chromatograms_written(&self) -> usize {
        self.next_chromatogram_id as usize + self.chromatogram_buffer.len()
    }

    fn write_run_row(&mut self) -> Result<(), SqMassError> {
        if self.run_row_written {
            return Ok(());
        }
        self.conn.execute(
            "INSERT INTO RUN (ID, FILENAME, NATIVE_ID, SAMPLE_NAME) VALUES (?1, ?2, ?3, ?4)",
            params![
                RUN_ID,
                self.settings.source_file,
                self.settings.run_id,
                self.settings.sample_name,
            ],
        )?;
        if self.store_metadata_blob {
            let blob = serde_json::to_vec(&self.settings)?;
            self.conn.execute(
                "INSERT INTO RUN_EXTRA (RUN_ID, DATA) VALUES (?1, ?2)",
                params![RUN_ID, blob],
            )?;
        }
        self.run_row_written = true;
        Ok(())
    }

    fn mz_axis_config(&self) -> BinaryArrayConfig {
        BinaryArrayConfig {
            numpress: self.options.numpress_mass_time,
            zlib: self.options.zlib_compression,
            precision: Precision::Float64,
        }
    }

    fn intensity_axis_config(&self) -> BinaryArrayConfig {
        BinaryArrayConfig {
            numpress: self.options.numpress_intensity,
            zlib: self.options.zlib_compression,
            precision: Precision::Float64,
        }
    }

    fn flush_spectra(&mut self) -> Result<(), SqMassError> {
        if self.spectrum_buffer.is_empty() {
            return Ok(());
        }
        self.write_run_row()?;
        let batch = std::mem::take(&mut self.spectrum_buffer);
        let mz_config = self.mz_axis_config();
        let int_config = self.intensity_axis_config();

        let tx = self.conn.transaction()?;
        for spectrum in batch {
            let id = self.next_spectrum_id;
            self.next_spectrum_id += 1;
            tx.execute(
                "INSERT INTO SPECTRUM (ID, RUN_ID, NATIVE_ID, MSLEVEL, SCAN_POLARITY, RETENTION_TIME)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, RUN_ID, spectrum.native_id, spectrum.ms_level, 0, spectrum.rt],
            )?;
            for precursor in &spectrum.precursors {
                tx.execute(
                    "INSERT INTO PRECURSOR (SPECTRUM_ID, CHROMATOGRAM_ID, CHARGE,
                        ISOLATION_TARGET, ISOLATION_LOWER, ISOLATION_UPPER)
                     VALUES (?1, NULL, ?2, ?3, ?4, ?5)",
                    params![
                        id,
                        precursor.charge,
                        precursor.mz,
                        precursor.isolation_window_lower,
                        precursor.isolation_window_upper,
                    ],
                )?;
            }
            let mzs: Vec<f64> = spectrum.peaks.iter().map(|p| p.mz).collect();
            let intensities: Vec<f64> =
                spectrum.peaks.iter().map(|p| p.intensity as f64).collect();
            insert_blob(&tx, Owner::Spectrum(id), SqMassDataType::Mz, &mzs, &mz_config)?;
            insert_blob(
                &tx,
                Owner::Spectrum(id),
                SqMassDataType::Intensity,
                &intensities,
                &int_config,
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn flush_chromatograms(&mut self) -> Result<(), SqMassError> {
        if self.chromatogram_buffer.is_empty() {
            return Ok(());
        }
        self.write_run_row()?;
        let batch = std::mem::take(&mut self.chromatogram_buffer);
        let rt_config = self.mz_axis_config();
        let int_config = self.intensity_axis_config();

        let tx = self.conn.transaction()?;
        for chromatogram in batch {
            let id = self.next_chromatogram_id;
            self.next_chromatogram_id += 1;
            tx.execute(
                "INSERT INTO CHROMATOGRAM (ID, RUN_ID, NATIVE_ID, PRECURSOR_MZ, PRODUCT_MZ)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    RUN_ID,
                    chromatogram.native_id,
                    chromatogram.precursor_mz,
                    chromatogram.product_mz,
                ],
            )?;
            if let Some(precursor_mz) = chromatogram.precursor_mz {
                tx.execute(
                    "INSERT INTO PRECURSOR (SPECTRUM_ID, CHROMATOGRAM_ID, CHARGE,
                        ISOLATION_TARGET, ISOLATION_LOWER, ISOLATION_UPPER)
                     VALUES (NULL, ?1, NULL, ?2, NULL, NULL)",
                    params![id, precursor_mz],
                )?;
            }
            if let Some(product_mz) = chromatogram.product_mz {
                tx.execute(
                    "INSERT INTO PRODUCT (SPECTRUM_ID, CHROMATOGRAM_ID,
                        ISOLATION_TARGET, ISOLATION_LOWER, ISOLATION_UPPER)
                     VALUES (NULL, ?1, ?2, NULL, NULL)",
                    params![id, product_mz],
                )?;
            }
            let times: Vec<f64> = chromatogram.points.iter().map(|p| p.rt).collect();
            let intensities: Vec<f64> = chromatogram
                .points
                .iter()
                .map(|p| p.intensity as f64)
                .collect();
            insert_blob(&tx, Owner::Chromatogram(id), SqMassDataType::Rt, &times, &rt_config)?;
            insert_blob(
                &tx,
                Owner::Chromatogram(id),
                SqMassDataType::Intensity,
                &intensities,
                &int_config,
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

enum Owner {
    Spectrum(i64),
    Chromatogram(i64),
}

fn insert_blob(
    tx: &rusqlite::Transaction,
    owner: Owner,
    data_type: SqMassDataType,
    values: &[f64],
    config: &BinaryArrayConfig,
) -> Result<(), SqMassError> {
    let (payload, effective) = encode_array_raw(values, config)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let compression = SqMassCompression::from_effective(&effective);
    let (spectrum_id, chromatogram_id) = match owner {
        Owner::Spectrum(id) => (Some(id), None),
        Owner::Chromatogram(id) => (None, Some(id)),
    };
    tx.execute(
        "INSERT INTO DATA (SPECTRUM_ID, CHROMATOGRAM_ID, DATA_TYPE, COMPRESSION, DATA)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            spectrum_id,
            chromatogram_id,
            data_type as i64,
            compression as i64,
            payload,
        ],
    )?;
    Ok(())
}

impl MsDataConsumer for SqMassWriter {
    fn set_experimental_settings(&mut self, settings: &ExperimentalSettings) {
        self.settings = settings.clone();
    }

    fn set_expected_size(&mut self, n_spectra: usize, n_chromatograms: usize) {
        self.spectra_expected = n_spectra;
        self.chromatograms_expected = n_chromatograms;
        let pool = self.options.pool_size.max(1);
        self.spectrum_buffer.reserve(pool.min(n_spectra));
        self.chromatogram_buffer.reserve(pool.min(n_chromatograms));
    }

    fn consume_spectrum(&mut self, spectrum: Spectrum) -> Result<(), ConsumerError> {
        if self.closed {
            return Err(ConsumerError::NotReady("writer already closed"));
        }
        if self.writing_chromatograms {
            return Err(ConsumerError::MisorderedStream);
        }
        self.spectrum_buffer.push(spectrum);
        if self.spectrum_buffer.len() >= self.options.pool_size.max(1) {
            self.flush_spectra().map_err(ConsumerError::from)?;
        }
        Ok(())
    }

    fn consume_chromatogram(&mut self, chromatogram: Chromatogram) -> Result<(), ConsumerError> {
        if self.closed {
            return Err(ConsumerError::NotReady("writer already closed"));
        }
        if !self.writing_chromatograms {
            // Spectrum writing ends here; flush so ids stay insertion-ordered.
            self.flush_spectra().map_err(ConsumerError::from)?;
            self.writing_chromatograms = true;
        }
        self.chromatogram_buffer.push(chromatogram);
        if self.chromatogram_buffer.len() >= self.options.pool_size.max(1) {
            self.flush_chromatograms().map_err(ConsumerError::from)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConsumerError> {
        if self.closed {
            return Ok(());
        }
        self.flush_spectra().map_err(ConsumerError::from)?;
        self.flush_chromatograms().map_err(ConsumerError::from)?;
        self.write_run_row()
            .map_err(|e| ConsumerError::Backend(e.to_string()))?;
        // Expected counts are not enforced, only reported.
        log::info!(
            "sqMass run complete: {} of {} expected spectra, {} of {} expected chromatograms",
            self.next_spectrum_id,
            self.spectra_expected,
            self.next_chromatogram_id,
            self.chromatograms_expected
        );
        self.closed = true;
        Ok(())
    }
}

impl Drop for SqMassWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                log::error!("failed to finalise sqMass output: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::numpress::NumpressConfig;
    use crate::model::{ChromatogramPoint, Peak1D};

    fn sample_spectrum(i: usize) -> Spectrum {
        let mut s = Spectrum::new(format!("scan={i}"), 1, i as f64);
        s.peaks = vec![
            Peak1D {
                mz: 100.0 + i as f64,
                intensity: 10.0,
            },
            Peak1D {
                mz: 200.0 + i as f64,
                intensity: 20.0,
            },
        ];
        s
    }

    fn write_sample(options: PeakFileOptions, path: &std::path::Path) {
        let mut writer = SqMassWriter::create(path, options).unwrap();
        writer.set_experimental_settings(&ExperimentalSettings {
            run_id: "run1".into(),
            source_file: Some("input.mzML".into()),
            ..Default::default()
        });
        writer.store_metadata_blob(true);
        writer.set_expected_size(3, 1);
        for i in 0..3 {
            writer.consume_spectrum(sample_spectrum(i)).unwrap();
        }
        let mut tic = Chromatogram::new("TIC");
        tic.precursor_mz = Some(500.0);
        tic.points = vec![
            ChromatogramPoint {
                rt: 0.0,
                intensity: 30.0,
            },
            ChromatogramPoint {
                rt: 1.0,
                intensity: 31.0,
            },
        ];
        writer.consume_chromatogram(tic).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn rows_and_blobs_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.sqMass");
        write_sample(PeakFileOptions::default(), &path);

        let conn = Connection::open(&path).unwrap();
        let n_spectra: i64 = conn
            .query_row("SELECT COUNT(*) FROM SPECTRUM", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n_spectra, 3);
        let n_data: i64 = conn
            .query_row("SELECT COUNT(*) FROM DATA", [], |r| r.get(0))
            .unwrap();
        // two axes per spectrum and per chromatogram
        assert_eq!(n_data, 8);
        let run_native: String = conn
            .query_row("SELECT NATIVE_ID FROM RUN", [], |r| r.get(0))
            .unwrap();
        assert_eq!(run_native, "run1");
        let extra: Vec<u8> = conn
            .query_row("SELECT DATA FROM RUN_EXTRA", [], |r| r.get(0))
            .unwrap();
        let settings: ExperimentalSettings = serde_json::from_slice(&extra).unwrap();
        assert_eq!(settings.source_file.as_deref(), Some("input.mzML"));
    }

    #[test]
    fn uncompressed_blob_is_raw_doubles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.sqMass");
        write_sample(PeakFileOptions::default(), &path);

        let conn = Connection::open(&path).unwrap();
        let (compression, blob): (i64, Vec<u8>) = conn
            .query_row(
                "SELECT COMPRESSION, DATA FROM DATA WHERE SPECTRUM_ID = 0 AND DATA_TYPE = 0",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(compression, SqMassCompression::None as i64);
        assert_eq!(blob.len(), 16);
        let first = f64::from_le_bytes(blob[..8].try_into().unwrap());
        assert!((first - 100.0).abs() < 1e-12);
    }

    #[test]
    fn numpress_compression_codes_are_pinned() {
        let mut options = PeakFileOptions::default();
        options.numpress_mass_time = NumpressConfig::with_kind(NumpressKind::Linear);
        options.numpress_intensity = NumpressConfig::with_kind(NumpressKind::Slof);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("np.sqMass");
        write_sample(options, &path);

        let conn = Connection::open(&path).unwrap();
        let mz_code: i64 = conn
            .query_row(
                "SELECT COMPRESSION FROM DATA WHERE SPECTRUM_ID = 0 AND DATA_TYPE = 0",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(mz_code, 5);
        let int_code: i64 = conn
            .query_row(
                "SELECT COMPRESSION FROM DATA WHERE SPECTRUM_ID = 0 AND DATA_TYPE = 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(int_code, 8);
    }

    #[test]
    fn spectrum_after_chromatogram_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.sqMass");
        let mut writer = SqMassWriter::create(&path, PeakFileOptions::default()).unwrap();
        writer
            .consume_chromatogram(Chromatogram::new("TIC"))
            .unwrap();
        assert!(matches!(
            writer.consume_spectrum(sample_spectrum(0)),
            Err(ConsumerError::MisorderedStream)
        ));
    }
}

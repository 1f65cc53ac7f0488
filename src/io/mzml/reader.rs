//! Streaming mzML reader.
//!
//! A pull parser over `<spectrum>` and `<chromatogram>` elements designed
//! for arbitrarily large files: one item is materialised at a time and
//! either returned to the caller or pushed into an [`MsDataConsumer`].
//! Binary data arrays are decoded through the full codec chain, including
//! the Numpress encodings. Indexed files are handled by ignoring the
//! trailing index elements.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::io::binary::{decode_array, BinaryCodecError, Precision};
use crate::io::consumer::{ConsumerError, MsDataConsumer};
use crate::io::numpress::NumpressKind;
use crate::io::options::PeakFileOptions;
use crate::model::{
    Chromatogram, ChromatogramPoint, Experiment, ExperimentalSettings, Peak1D, Precursor, Spectrum,
};

use super::cv;

/// Errors raised while parsing mzML input.
#[derive(Debug, thiserror::Error)]
pub enum MzMLError {
    /// XML-level parse failure
    #[error("xml parsing error: {0}")]
    Xml(String),

    /// Underlying I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary payload could not be decoded
    #[error(transparent)]
    Binary(#[from] BinaryCodecError),

    /// Structurally invalid document
    #[error("invalid mzML structure: {0}")]
    InvalidStructure(String),

    /// Attribute or text content was not valid UTF-8
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A downstream consumer failed while being driven by the reader
    #[error("consumer error: {0}")]
    Consumer(#[from] ConsumerError),
}

impl From<quick_xml::Error> for MzMLError {
    fn from(e: quick_xml::Error) -> Self {
        MzMLError::Xml(e.to_string())
    }
}

/// One item pulled from the stream.
#[derive(Debug)]
pub enum MzMLItem {
    /// A spectrum in acquisition order
    Spectrum(Spectrum),
    /// A chromatogram
    Chromatogram(Chromatogram),
}

/// Streaming parser for mzML files.
pub struct MzMLReader<R: BufRead> {
    reader: Reader<R>,
    settings: ExperimentalSettings,
    spectrum_count: Option<usize>,
    chromatogram_count: Option<usize>,
}

impl MzMLReader<BufReader<File>> {
    /// Open an mzML file for streaming.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MzMLError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::with_capacity(64 * 1024, file)))
    }
}

impl<R: BufRead> MzMLReader<R> {
    /// Create a reader over any buffered source.
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            settings: ExperimentalSettings::default(),
            spectrum_count: None,
            chromatogram_count: None,
        }
    }

    /// Run-level settings collected from the header; complete once the
    /// first item has been returned.
    pub fn settings(&self) -> &ExperimentalSettings {
        &self.settings
    }

    /// Declared list sizes `(spectra, chromatograms)`, when seen.
    pub fn expected_counts(&self) -> (Option<usize>, Option<usize>) {
        (self.spectrum_count, self.chromatogram_count)
    }

    /// Pull the next spectrum or chromatogram, or `None` at end of input.
    pub fn next_item(&mut self) -> Result<Option<MzMLItem>, MzMLError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let event = self
                .reader
                .read_event_into(&mut buf)
                .map_err(MzMLError::from)?;
            match event {
                Event::Start(ref e) => match e.name().as_ref() {
                    b"run" => {
                        if let Some(id) = get_attribute(e, "id")? {
                            self.settings.run_id = id;
                        }
                    }
                    b"sourceFile" => {
                        if self.settings.source_file.is_none() {
                            self.settings.source_file = get_attribute(e, "name")?;
                        }
                    }
                    b"spectrumList" => {
                        self.spectrum_count =
                            get_attribute(e, "count")?.and_then(|c| c.parse().ok());
                    }
                    b"chromatogramList" => {
                        self.chromatogram_count =
                            get_attribute(e, "count")?.and_then(|c| c.parse().ok());
                    }
                    b"spectrum" => {
                        let spectrum = self.parse_spectrum(e.to_owned())?;
                        return Ok(Some(MzMLItem::Spectrum(spectrum)));
                    }
                    b"chromatogram" => {
                        let chromatogram = self.parse_chromatogram(e.to_owned())?;
                        return Ok(Some(MzMLItem::Chromatogram(chromatogram)));
                    }
                    // The trailing index of indexedmzML is not re-parsed.
                    b"indexList" => {
                        self.skip_to_end(b"indexList")?;
                    }
                    _ => {}
                },
                Event::Empty(ref e) => {
                    if e.name().as_ref() == b"sourceFile" && self.settings.source_file.is_none() {
                        self.settings.source_file = get_attribute(e, "name")?;
                    }
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }

    fn skip_to_end(&mut self, tag: &[u8]) -> Result<(), MzMLError> {
        let mut depth = 1usize;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match self
                .reader
                .read_event_into(&mut buf)
                .map_err(MzMLError::from)?
            {
                Event::Start(ref e) if e.name().as_ref() == tag => depth += 1,
                Event::End(ref e) if e.name().as_ref() == tag => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Event::Eof => {
                    return Err(MzMLError::InvalidStructure(format!(
                        "unterminated <{}>",
                        String::from_utf8_lossy(tag)
                    )))
                }
                _ => {}
            }
        }
    }

    fn parse_spectrum(&mut self, start: BytesStart<'static>) -> Result<Spectrum, MzMLError> {
        let mut spectrum = Spectrum::default();
        spectrum.native_id = get_attribute(&start, "id")?.unwrap_or_default();
        spectrum.ms_level = 1;

        let mut current_precursor: Option<Precursor> = None;
        let mut in_isolation_window = false;
        let mut arrays: Vec<DecodedArray> = Vec::new();
        let mut current_array: Option<PendingArray> = None;
        let mut in_binary = false;
        let mut binary_text = String::new();

        let mut buf = Vec::new();
        loop {
            buf.clear();
            let event = self
                .reader
                .read_event_into(&mut buf)
                .map_err(MzMLError::from)?;
            match event {
                Event::Start(ref e) => match e.name().as_ref() {
                    b"precursor" => current_precursor = Some(Precursor::default()),
                    b"isolationWindow" => in_isolation_window = true,
                    b"binaryDataArray" => current_array = Some(PendingArray::default()),
                    b"binary" => {
                        in_binary = true;
                        binary_text.clear();
                    }
                    _ => {}
                },
                Event::Empty(ref e) => {
                    if e.name().as_ref() == b"cvParam" {
                        let param = CvAttr::parse(e)?;
                        if let Some(array) = current_array.as_mut() {
                            array.apply(&param);
                        } else if in_isolation_window {
                            apply_isolation_param(&param, current_precursor.as_mut());
                        } else if let Some(precursor) = current_precursor.as_mut() {
                            apply_selected_ion_param(&param, precursor);
                        } else {
                            apply_spectrum_param(&param, &mut spectrum);
                        }
                    }
                }
                Event::Text(ref t) => {
                    if in_binary {
                        binary_text.push_str(std::str::from_utf8(t)?.trim());
                    }
                }
                Event::End(ref e) => match e.name().as_ref() {
                    b"spectrum" => break,
                    b"precursor" => {
                        if let Some(precursor) = current_precursor.take() {
                            spectrum.precursors.push(precursor);
                        }
                    }
                    b"isolationWindow" => in_isolation_window = false,
                    b"binary" => in_binary = false,
                    b"binaryDataArray" => {
                        if let Some(pending) = current_array.take() {
                            arrays.push(pending.decode(&binary_text)?);
                            binary_text.clear();
                        }
                    }
                    _ => {}
                },
                Event::Eof => {
                    return Err(MzMLError::InvalidStructure(
                        "unterminated <spectrum>".into(),
                    ))
                }
                _ => {}
            }
        }

        let mut mz = Vec::new();
        let mut intensity = Vec::new();
        for array in arrays {
            match array.kind {
                ArrayKind::Mz => mz = array.values,
                ArrayKind::Intensity => intensity = array.values,
                ArrayKind::Time | ArrayKind::Unknown => {}
            }
        }
        if mz.len() != intensity.len() {
            return Err(MzMLError::InvalidStructure(format!(
                "spectrum '{}': m/z and intensity arrays differ in length ({} vs {})",
                spectrum.native_id,
                mz.len(),
                intensity.len()
            )));
        }
        spectrum.peaks = mz
            .into_iter()
            .zip(intensity)
            .map(|(mz, intensity)| Peak1D {
                mz,
                intensity: intensity as f32,
            })
            .collect();
        Ok(spectrum)
    }

    fn parse_chromatogram(
        &mut self,
        start: BytesStart<'static>,
    ) -> Result<Chromatogram, MzMLError> {
        let mut chromatogram = Chromatogram::default();
        chromatogram.native_id = get_attribute(&start, "id")?.unwrap_or_default();

        let mut arrays: Vec<DecodedArray> = Vec::new();
        let mut current_array: Option<PendingArray> = None;
        let mut in_binary = false;
        let mut binary_text = String::new();
        let mut in_precursor = false;
        let mut in_product = false;

        let mut buf = Vec::new();
        loop {
            buf.clear();
            let event = self
                .reader
                .read_event_into(&mut buf)
                .map_err(MzMLError::from)?;
            match event {
                Event::Start(ref e) => match e.name().as_ref() {
                    b"binaryDataArray" => current_array = Some(PendingArray::default()),
                    b"binary" => {
                        in_binary = true;
                        binary_text.clear();
                    }
                    b"precursor" => in_precursor = true,
                    b"product" => in_product = true,
                    _ => {}
                },
                Event::Empty(ref e) => {
                    if e.name().as_ref() == b"cvParam" {
                        let param = CvAttr::parse(e)?;
                        if let Some(array) = current_array.as_mut() {
                            array.apply(&param);
                        } else if param.accession == cv::ISOLATION_WINDOW_TARGET {
                            let target = param.value_f64();
                            if in_precursor {
                                chromatogram.precursor_mz = target;
                            } else if in_product {
                                chromatogram.product_mz = target;
                            }
                        }
                    }
                }
                Event::Text(ref t) => {
                    if in_binary {
                        binary_text.push_str(std::str::from_utf8(t)?.trim());
                    }
                }
                Event::End(ref e) => match e.name().as_ref() {
                    b"chromatogram" => break,
                    b"binary" => in_binary = false,
                    b"precursor" => in_precursor = false,
                    b"product" => in_product = false,
                    b"binaryDataArray" => {
                        if let Some(pending) = current_array.take() {
                            arrays.push(pending.decode(&binary_text)?);
                            binary_text.clear();
                        }
                    }
                    _ => {}
                },
                Event::Eof => {
                    return Err(MzMLError::InvalidStructure(
                        "unterminated <chromatogram>".into(),
                    ))
                }
                _ => {}
            }
        }

        let mut time = Vec::new();
        let mut intensity = Vec::new();
        for array in arrays {
            match array.kind {
                ArrayKind::Time => time = array.values,
                ArrayKind::Intensity => intensity = array.values,
                ArrayKind::Mz | ArrayKind::Unknown => {}
            }
        }
        if time.len() != intensity.len() {
            return Err(MzMLError::InvalidStructure(format!(
                "chromatogram '{}': time and intensity arrays differ in length",
                chromatogram.native_id
            )));
        }
        chromatogram.points = time
            .into_iter()
            .zip(intensity)
            .map(|(rt, intensity)| ChromatogramPoint {
                rt,
                intensity: intensity as f32,
            })
            .collect();
        Ok(chromatogram)
    }
}

/// Axis content of one binary data array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ArrayKind {
    #[default]
    Unknown,
    Mz,
    Intensity,
    Time,
}

#[derive(Debug, Default)]
struct PendingArray {
    kind: ArrayKind,
    numpress: NumpressKind,
    zlib: bool,
    precision: Precision,
    minutes: bool,
}

#[derive(Debug)]
struct DecodedArray {
    kind: ArrayKind,
    values: Vec<f64>,
}

impl PendingArray {
    fn apply(&mut self, param: &CvAttr) {
        match param.accession.as_str() {
            cv::MZ_ARRAY => self.kind = ArrayKind::Mz,
            cv::INTENSITY_ARRAY => self.kind = ArrayKind::Intensity,
            cv::TIME_ARRAY => {
                self.kind = ArrayKind::Time;
                self.minutes = param.unit_accession.as_deref() == Some(cv::UNIT_MINUTE);
            }
            cv::FLOAT_32 => self.precision = Precision::Float32,
            cv::FLOAT_64 => self.precision = Precision::Float64,
            cv::ZLIB_COMPRESSION => self.zlib = true,
            cv::NO_COMPRESSION => {}
            cv::NUMPRESS_LINEAR => self.numpress = NumpressKind::Linear,
            cv::NUMPRESS_PIC => self.numpress = NumpressKind::Pic,
            cv::NUMPRESS_SLOF => self.numpress = NumpressKind::Slof,
            _ => {}
        }
    }

    fn decode(self, text: &str) -> Result<DecodedArray, BinaryCodecError> {
        let mut values = decode_array(text, self.numpress, self.zlib, self.precision)?;
        if self.minutes {
            for v in &mut values {
                *v *= 60.0;
            }
        }
        Ok(DecodedArray {
            kind: self.kind,
            values,
        })
    }
}

/// The attributes of one `<cvParam>` element.
struct CvAttr {
    accession: String,
    value: Option<String>,
    unit_accession: Option<String>,
}

impl CvAttr {
    fn parse(e: &BytesStart) -> Result<Self, MzMLError> {
        Ok(Self {
            accession: get_attribute(e, "accession")?.unwrap_or_default(),
            value: get_attribute(e, "value")?,
            unit_accession: get_attribute(e, "unitAccession")?,
        })
    }

    fn value_f64(&self) -> Option<f64> {
        self.value.as_deref().and_then(|v| v.parse().ok())
    }
}

fn apply_spectrum_param(param: &CvAttr, spectrum: &mut Spectrum) {
    match param.accession.as_str() {
        cv::MS_LEVEL => {
            if let Some(level) = param.value.as_deref().and_then(|v| v.parse().ok()) {
                spectrum.ms_level = level;
            }
        }
        cv::SCAN_START_TIME => {
            if let Some(rt) = param.value_f64() {
                spectrum.rt = if param.unit_accession.as_deref() == Some(cv::UNIT_MINUTE) {
                    rt * 60.0
                } else {
                    rt
                };
            }
        }
        _ => {}
    }
}

fn apply_selected_ion_param(param: &CvAttr, precursor: &mut Precursor) {
    match param.accession.as_str() {
        cv::SELECTED_ION_MZ => {
            if let Some(mz) = param.value_f64() {
                precursor.mz = mz;
            }
        }
        cv::PEAK_INTENSITY => precursor.intensity = param.value_f64(),
        cv::CHARGE_STATE => {
            precursor.charge = param.value.as_deref().and_then(|v| v.parse().ok());
        }
        _ => {}
    }
}

fn apply_isolation_param(param: &CvAttr, precursor: Option<&mut Precursor>) {
    let Some(precursor) = precursor else {
        return;
    };
    match param.accession.as_str() {
        cv::ISOLATION_WINDOW_TARGET => {
            if precursor.mz == 0.0 {
                if let Some(mz) = param.value_f64() {
                    precursor.mz = mz;
                }
            }
        }
        cv::ISOLATION_WINDOW_LOWER => precursor.isolation_window_lower = param.value_f64(),
        cv::ISOLATION_WINDOW_UPPER => precursor.isolation_window_upper = param.value_f64(),
        _ => {}
    }
}

fn get_attribute(e: &BytesStart, name: &str) -> Result<Option<String>, MzMLError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|a| MzMLError::Xml(a.to_string()))?;
        if attr.key.as_ref() == name.as_bytes() {
            let decoded = std::str::from_utf8(&attr.value)
                .map_err(|e| MzMLError::Xml(e.to_string()))?;
            let value = quick_xml::escape::unescape(decoded)
                .map_err(|e| MzMLError::Xml(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Load a whole mzML file into memory.
pub fn load_experiment(path: impl AsRef<Path>) -> Result<Experiment, MzMLError> {
    let mut reader = MzMLReader::open(path)?;
    let mut experiment = Experiment::default();
    while let Some(item) = reader.next_item()? {
        match item {
            MzMLItem::Spectrum(s) => experiment.spectra.push(s),
            MzMLItem::Chromatogram(c) => experiment.chromatograms.push(c),
        }
    }
    experiment.settings = reader.settings().clone();
    Ok(experiment)
}

/// Stream an mzML file into a consumer, applying the read-side filters of
/// `options`. Returns the number of spectra and chromatograms delivered.
pub fn transfer<C: MsDataConsumer>(
    path: impl AsRef<Path>,
    consumer: &mut C,
    options: &PeakFileOptions,
) -> Result<(usize, usize), MzMLError> {
    let mut reader = MzMLReader::open(path)?;

    // Items are buffered per kind so that the declared sizes can be handed
    // to the consumer before the first one is pushed; the peak data itself
    // still streams through one item at a time once counts are known.
    let mut n_spectra = 0usize;
    let mut n_chromatograms = 0usize;
    let mut pending: Vec<MzMLItem> = Vec::new();
    let mut counts_sent = false;

    while let Some(item) = reader.next_item()? {
        let item = match item {
            MzMLItem::Spectrum(mut s) => {
                if !options.accepts_spectrum(s.rt, s.ms_level) {
                    continue;
                }
                if options.mz_range.is_some() || options.intensity_range.is_some() {
                    s.peaks.retain(|p| {
                        options.mz_range.map_or(true, |r| r.contains(p.mz))
                            && options
                                .intensity_range
                                .map_or(true, |r| r.contains(p.intensity as f64))
                    });
                }
                n_spectra += 1;
                MzMLItem::Spectrum(s)
            }
            MzMLItem::Chromatogram(c) => {
                n_chromatograms += 1;
                MzMLItem::Chromatogram(c)
            }
        };

        if counts_sent {
            push_item(consumer, item)?;
        } else {
            match reader.expected_counts() {
                (Some(ns), nc) => {
                    consumer.set_experimental_settings(reader.settings());
                    consumer.set_expected_size(ns, nc.unwrap_or(0));
                    counts_sent = true;
                    for buffered in pending.drain(..) {
                        push_item(consumer, buffered)?;
                    }
                    push_item(consumer, item)?;
                }
                _ => pending.push(item),
            }
        }
    }

    if !counts_sent {
        consumer.set_experimental_settings(reader.settings());
        consumer.set_expected_size(n_spectra, n_chromatograms);
        for buffered in pending.drain(..) {
            push_item(consumer, buffered)?;
        }
    }
    consumer.close()?;
    Ok((n_spectra, n_chromatograms))
}

/// Stream an mzML file into a consumer with externally known item counts
/// (typically from a prior counting pass over the same file), avoiding any
/// buffering. The filters of `options` are applied as in [`transfer`].
pub fn transfer_with_counts<C: MsDataConsumer>(
    path: impl AsRef<Path>,
    consumer: &mut C,
    options: &PeakFileOptions,
    n_spectra: usize,
    n_chromatograms: usize,
) -> Result<(usize, usize), MzMLError> {
    let mut reader = MzMLReader::open(path)?;
    let mut sent = 0usize;
    let mut sent_chrom = 0usize;
    let mut configured = false;
    while let Some(item) = reader.next_item()? {
        match item {
            MzMLItem::Spectrum(mut s) => {
                if !options.accepts_spectrum(s.rt, s.ms_level) {
                    continue;
                }
                if options.mz_range.is_some() || options.intensity_range.is_some() {
                    s.peaks.retain(|p| {
                        options.mz_range.map_or(true, |r| r.contains(p.mz))
                            && options
                                .intensity_range
                                .map_or(true, |r| r.contains(p.intensity as f64))
                    });
                }
                if !configured {
                    consumer.set_experimental_settings(reader.settings());
                    consumer.set_expected_size(n_spectra, n_chromatograms);
                    configured = true;
                }
                consumer.consume_spectrum(s)?;
                sent += 1;
            }
            MzMLItem::Chromatogram(c) => {
                if !configured {
                    consumer.set_experimental_settings(reader.settings());
                    consumer.set_expected_size(n_spectra, n_chromatograms);
                    configured = true;
                }
                consumer.consume_chromatogram(c)?;
                sent_chrom += 1;
            }
        }
    }
    consumer.close()?;
    Ok((sent, sent_chrom))
}

fn push_item<C: MsDataConsumer>(consumer: &mut C, item: MzMLItem) -> Result<(), ConsumerError> {
    match item {
        MzMLItem::Spectrum(s) => consumer.consume_spectrum(s),
        MzMLItem::Chromatogram(c) => consumer.consume_chromatogram(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mzml::writer::MzMLWriter;
    use crate::io::numpress::{NumpressConfig, NumpressKind};

    fn sample_experiment_xml(options: PeakFileOptions) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = MzMLWriter::new(&mut buf, options);
            writer.set_experimental_settings(&ExperimentalSettings {
                run_id: "run42".into(),
                ..Default::default()
            });
            writer.set_expected_size(2, 1);

            let mut s1 = Spectrum::new("scan=1", 1, 10.0);
            s1.peaks = vec![
                Peak1D {
                    mz: 100.0,
                    intensity: 10.0,
                },
                Peak1D {
                    mz: 200.5,
                    intensity: 20.0,
                },
            ];
            writer.consume_spectrum(s1).unwrap();

            let mut s2 = Spectrum::new("scan=2", 2, 11.0);
            s2.precursors.push(Precursor {
                mz: 100.0,
                charge: Some(2),
                ..Default::default()
            });
            s2.peaks = vec![Peak1D {
                mz: 50.0,
                intensity: 5.0,
            }];
            writer.consume_spectrum(s2).unwrap();

            let mut tic = Chromatogram::new("TIC");
            tic.points = vec![
                ChromatogramPoint {
                    rt: 10.0,
                    intensity: 30.0,
                },
                ChromatogramPoint {
                    rt: 11.0,
                    intensity: 5.0,
                },
            ];
            writer.consume_chromatogram(tic).unwrap();
            writer.close().unwrap();
        }
        buf
    }

    fn read_all(xml: &[u8]) -> (Vec<Spectrum>, Vec<Chromatogram>) {
        let mut reader = MzMLReader::new(std::io::BufReader::new(xml));
        let mut spectra = Vec::new();
        let mut chromatograms = Vec::new();
        while let Some(item) = reader.next_item().unwrap() {
            match item {
                MzMLItem::Spectrum(s) => spectra.push(s),
                MzMLItem::Chromatogram(c) => chromatograms.push(c),
            }
        }
        (spectra, chromatograms)
    }

    #[test]
    fn writer_reader_roundtrip_plain() {
        let xml = sample_experiment_xml(PeakFileOptions::default());
        let (spectra, chromatograms) = read_all(&xml);
        assert_eq!(spectra.len(), 2);
        assert_eq!(chromatograms.len(), 1);
        assert_eq!(spectra[0].native_id, "scan=1");
        assert_eq!(spectra[0].peaks.len(), 2);
        assert!((spectra[0].peaks[1].mz - 200.5).abs() < 1e-9);
        assert!((spectra[0].rt - 10.0).abs() < 1e-9);
        assert_eq!(spectra[1].ms_level, 2);
        assert_eq!(spectra[1].precursors.len(), 1);
        assert_eq!(spectra[1].precursors[0].charge, Some(2));
        assert_eq!(chromatograms[0].points.len(), 2);
        assert!((chromatograms[0].points[1].rt - 11.0).abs() < 1e-9);
    }

    #[test]
    fn writer_reader_roundtrip_numpress_zlib() {
        let mut options = PeakFileOptions::default();
        options.zlib_compression = true;
        options.numpress_mass_time = NumpressConfig::with_kind(NumpressKind::Linear);
        options.numpress_intensity = NumpressConfig::with_kind(NumpressKind::Slof);
        let xml = sample_experiment_xml(options);
        let (spectra, _) = read_all(&xml);
        assert_eq!(spectra.len(), 2);
        assert!((spectra[0].peaks[0].mz - 100.0).abs() < 1e-3);
        assert!((spectra[0].peaks[1].mz - 200.5).abs() < 1e-3);
        let rel = (1.0 - spectra[0].peaks[1].intensity as f64 / 20.0).abs();
        assert!(rel < 1e-2);
    }

    #[test]
    fn transfer_filters_ms_levels() {
        use crate::io::consumer::NoopConsumer;
        let xml = sample_experiment_xml(PeakFileOptions::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.mzML");
        std::fs::write(&path, &xml).unwrap();

        let mut consumer = NoopConsumer::new();
        let options = PeakFileOptions {
            ms_levels: vec![1],
            ..Default::default()
        };
        let (n_spec, n_chrom) = transfer(&path, &mut consumer, &options).unwrap();
        assert_eq!(n_spec, 1);
        assert_eq!(n_chrom, 1);
        assert_eq!(consumer.spectra_seen(), 1);
    }

    #[test]
    fn run_id_is_recovered() {
        let xml = sample_experiment_xml(PeakFileOptions::default());
        let mut reader = MzMLReader::new(std::io::BufReader::new(&xml[..]));
        while reader.next_item().unwrap().is_some() {}
        assert_eq!(reader.settings().run_id, "run42");
    }
}

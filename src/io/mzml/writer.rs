//! Streaming mzML writing consumer.
//!
//! Spectra and chromatograms are serialised as soon as they are consumed;
//! nothing is buffered beyond the current item. The header is emitted
//! lazily on the first item so that the experimental settings and expected
//! counts can arrive late. In indexed mode the byte offset of every
//! `<spectrum>`/`<chromatogram>` start tag is recorded through a counting
//! writer that also maintains a running SHA-1, and the file ends with the
//! `<indexList>`, `<indexListOffset>` and `<fileChecksum>` elements of the
//! indexed mzML layout.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use sha1::{Digest, Sha1};

use crate::io::binary::{encode_array, BinaryArrayConfig, EffectiveEncoding, Precision};
use crate::io::consumer::{ConsumerError, MsDataConsumer};
use crate::io::numpress::NumpressKind;
use crate::io::options::PeakFileOptions;
use crate::model::{Chromatogram, ExperimentalSettings, Precursor, Spectrum};

use super::cv;

/// Byte-counting writer that feeds a running SHA-1 of everything written.
struct CountingWriter<W: Write> {
    inner: W,
    bytes_written: u64,
    hasher: Sha1,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
            hasher: Sha1::new(),
        }
    }

    fn position(&self) -> u64 {
        self.bytes_written
    }

    fn hash_hex(&self) -> String {
        let digest = self.hasher.clone().finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes_written += n as u64;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Hook run on every spectrum before serialisation.
pub type SpectrumProcessor = Box<dyn FnMut(&mut Spectrum) + Send>;
/// Hook run on every chromatogram before serialisation.
pub type ChromatogramProcessor = Box<dyn FnMut(&mut Chromatogram) + Send>;

/// Streaming mzML writer implementing [`MsDataConsumer`].
pub struct MzMLWriter<W: Write> {
    writer: Writer<CountingWriter<W>>,
    options: PeakFileOptions,
    settings: ExperimentalSettings,
    started_writing: bool,
    writing_spectra: bool,
    writing_chromatograms: bool,
    closed: bool,
    spectra_written: usize,
    chromatograms_written: usize,
    spectra_expected: usize,
    chromatograms_expected: usize,
    spectrum_offsets: Vec<(String, u64)>,
    chromatogram_offsets: Vec<(String, u64)>,
    spectrum_processor: Option<SpectrumProcessor>,
    chromatogram_processor: Option<ChromatogramProcessor>,
    additional_data_processing: Option<String>,
}

impl MzMLWriter<BufWriter<File>> {
    /// Create a writer producing a file at `path`.
    pub fn create(path: impl AsRef<Path>, options: PeakFileOptions) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), options))
    }
}

impl<W: Write> MzMLWriter<W> {
    /// Create a writer over any byte sink.
    pub fn new(sink: W, options: PeakFileOptions) -> Self {
        Self {
            writer: Writer::new(CountingWriter::new(sink)),
            options,
            settings: ExperimentalSettings::default(),
            started_writing: false,
            writing_spectra: false,
            writing_chromatograms: false,
            closed: false,
            spectra_written: 0,
            chromatograms_written: 0,
            spectra_expected: 0,
            chromatograms_expected: 0,
            spectrum_offsets: Vec::new(),
            chromatogram_offsets: Vec::new(),
            spectrum_processor: None,
            chromatogram_processor: None,
            additional_data_processing: None,
        }
    }

    /// Install a hook that can centroid, filter or annotate each spectrum
    /// before it is written.
    pub fn set_spectrum_processor(&mut self, processor: SpectrumProcessor) {
        self.spectrum_processor = Some(processor);
    }

    /// Install a hook run on each chromatogram before it is written.
    pub fn set_chromatogram_processor(&mut self, processor: ChromatogramProcessor) {
        self.chromatogram_processor = Some(processor);
    }

    /// Stamp an extra data-processing record onto the output; it is listed
    /// in the header and referenced by every written item.
    pub fn add_data_processing(&mut self, description: impl Into<String>) {
        self.additional_data_processing = Some(description.into());
    }

    /// Number of spectra written so far.
    pub fn spectra_written(&self) -> usize {
        self.spectra_written
    }

    /// Number of chromatograms written so far.
    pub fn chromatograms_written(&self) -> usize {
        self.chromatograms_written
    }

    fn write_event(&mut self, event: Event) -> Result<(), ConsumerError> {
        self.writer
            .write_event(event)
            .map_err(|e| ConsumerError::Backend(format!("xml write error: {e}")))
    }

    fn write_header(&mut self) -> Result<(), ConsumerError> {
        self.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        if self.options.write_index {
            let mut indexed = BytesStart::new("indexedmzML");
            indexed.push_attribute(("xmlns", "http://psi.hupo.org/ms/mzml"));
            indexed.push_attribute(("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"));
            indexed.push_attribute((
                "xsi:schemaLocation",
                "http://psi.hupo.org/ms/mzml http://psidev.info/files/ms/mzML/xsd/mzML1.1.2_idx.xsd",
            ));
            self.write_event(Event::Start(indexed))?;
        }

        let mut mzml = BytesStart::new("mzML");
        mzml.push_attribute(("xmlns", "http://psi.hupo.org/ms/mzml"));
        mzml.push_attribute(("version", "1.1.0"));
        if !self.settings.run_id.is_empty() {
            mzml.push_attribute(("id", self.settings.run_id.as_str()));
        }
        self.write_event(Event::Start(mzml))?;

        // <cvList>
        let mut cv_list = BytesStart::new("cvList");
        cv_list.push_attribute(("count", "2"));
        self.write_event(Event::Start(cv_list))?;
        let mut cv_ms = BytesStart::new("cv");
        cv_ms.push_attribute(("id", cv::CV_MS));
        cv_ms.push_attribute((
            "fullName",
            "Proteomics Standards Initiative Mass Spectrometry Ontology",
        ));
        cv_ms.push_attribute((
            "URI",
            "https://raw.githubusercontent.com/HUPO-PSI/psi-ms-CV/master/psi-ms.obo",
        ));
        self.write_event(Event::Empty(cv_ms))?;
        let mut cv_uo = BytesStart::new("cv");
        cv_uo.push_attribute(("id", cv::CV_UO));
        cv_uo.push_attribute(("fullName", "Unit Ontology"));
        cv_uo.push_attribute((
            "URI",
            "https://raw.githubusercontent.com/bio-ontology-research-group/unit-ontology/master/unit.obo",
        ));
        self.write_event(Event::Empty(cv_uo))?;
        self.write_event(Event::End(BytesEnd::new("cvList")))?;

        // <fileDescription>
        self.write_event(Event::Start(BytesStart::new("fileDescription")))?;
        self.write_event(Event::Start(BytesStart::new("fileContent")))?;
        self.write_cv_param(cv::MS1_SPECTRUM, "MS1 spectrum", None)?;
        self.write_cv_param(cv::CENTROID_SPECTRUM, "centroid spectrum", None)?;
        self.write_event(Event::End(BytesEnd::new("fileContent")))?;
        if let Some(source) = self.settings.source_file.clone() {
            let mut sf_list = BytesStart::new("sourceFileList");
            sf_list.push_attribute(("count", "1"));
            self.write_event(Event::Start(sf_list))?;
            let mut sf = BytesStart::new("sourceFile");
            sf.push_attribute(("id", "SF1"));
            sf.push_attribute(("name", source.as_str()));
            sf.push_attribute(("location", "file:///"));
            self.write_event(Event::Empty(sf))?;
            self.write_event(Event::End(BytesEnd::new("sourceFileList")))?;
        }
        self.write_event(Event::End(BytesEnd::new("fileDescription")))?;

        // <softwareList>
        let mut sw_list = BytesStart::new("softwareList");
        sw_list.push_attribute(("count", "1"));
        self.write_event(Event::Start(sw_list))?;
        let mut sw = BytesStart::new("software");
        sw.push_attribute(("id", "mzproc"));
        sw.push_attribute(("version", env!("CARGO_PKG_VERSION")));
        self.write_event(Event::Empty(sw))?;
        self.write_event(Event::End(BytesEnd::new("softwareList")))?;

        // <instrumentConfigurationList> (mandatory, minimal)
        let mut ic_list = BytesStart::new("instrumentConfigurationList");
        ic_list.push_attribute(("count", "1"));
        self.write_event(Event::Start(ic_list))?;
        let mut ic = BytesStart::new("instrumentConfiguration");
        ic.push_attribute(("id", "IC1"));
        if let Some(model) = self.settings.instrument_model.clone() {
            self.write_event(Event::Start(ic))?;
            let mut up = BytesStart::new("userParam");
            up.push_attribute(("name", "instrument model"));
            up.push_attribute(("value", model.as_str()));
            self.write_event(Event::Empty(up))?;
            self.write_event(Event::End(BytesEnd::new("instrumentConfiguration")))?;
        } else {
            self.write_event(Event::Empty(ic))?;
        }
        self.write_event(Event::End(BytesEnd::new("instrumentConfigurationList")))?;

        // <dataProcessingList>
        let n_dp = 1 + usize::from(self.additional_data_processing.is_some());
        let mut dp_list = BytesStart::new("dataProcessingList");
        dp_list.push_attribute(("count", n_dp.to_string().as_str()));
        self.write_event(Event::Start(dp_list))?;
        let mut dp = BytesStart::new("dataProcessing");
        dp.push_attribute(("id", "DP1"));
        self.write_event(Event::Start(dp))?;
        let prior = self.settings.data_processing.clone();
        for (order, action) in prior.iter().enumerate() {
            self.write_processing_method(order, action)?;
        }
        if prior.is_empty() {
            self.write_processing_method(0, "conversion to mzML")?;
        }
        self.write_event(Event::End(BytesEnd::new("dataProcessing")))?;
        if let Some(extra) = self.additional_data_processing.clone() {
            let mut dp = BytesStart::new("dataProcessing");
            dp.push_attribute(("id", "DP_extra"));
            self.write_event(Event::Start(dp))?;
            self.write_processing_method(0, &extra)?;
            self.write_event(Event::End(BytesEnd::new("dataProcessing")))?;
        }
        self.write_event(Event::End(BytesEnd::new("dataProcessingList")))?;

        // <run>
        let mut run = BytesStart::new("run");
        let run_id = if self.settings.run_id.is_empty() {
            "run1"
        } else {
            self.settings.run_id.as_str()
        };
        let run_id = run_id.to_string();
        run.push_attribute(("id", run_id.as_str()));
        run.push_attribute(("defaultInstrumentConfigurationRef", "IC1"));
        self.write_event(Event::Start(run))?;

        self.started_writing = true;
        Ok(())
    }

    fn write_processing_method(&mut self, order: usize, action: &str) -> Result<(), ConsumerError> {
        let mut pm = BytesStart::new("processingMethod");
        let order = order.to_string();
        pm.push_attribute(("order", order.as_str()));
        pm.push_attribute(("softwareRef", "mzproc"));
        self.write_event(Event::Start(pm))?;
        self.write_cv_param(cv::DATA_PROCESSING_ACTION, "data processing action", Some(action))?;
        self.write_event(Event::End(BytesEnd::new("processingMethod")))?;
        Ok(())
    }

    fn write_cv_param(
        &mut self,
        accession: &str,
        name: &str,
        value: Option<&str>,
    ) -> Result<(), ConsumerError> {
        let mut param = BytesStart::new("cvParam");
        param.push_attribute(("cvRef", cv::CV_MS));
        param.push_attribute(("accession", accession));
        param.push_attribute(("name", name));
        if let Some(v) = value {
            param.push_attribute(("value", v));
        }
        self.write_event(Event::Empty(param))
    }

    fn write_cv_param_with_unit(
        &mut self,
        accession: &str,
        name: &str,
        value: &str,
        unit_accession: &str,
        unit_name: &str,
    ) -> Result<(), ConsumerError> {
        let mut param = BytesStart::new("cvParam");
        param.push_attribute(("cvRef", cv::CV_MS));
        param.push_attribute(("accession", accession));
        param.push_attribute(("name", name));
        param.push_attribute(("value", value));
        param.push_attribute(("unitCvRef", cv::CV_UO));
        param.push_attribute(("unitAccession", unit_accession));
        param.push_attribute(("unitName", unit_name));
        self.write_event(Event::Empty(param))
    }

    /// Emit one `<binaryDataArray>` with the CV params matching the
    /// encoding that was actually applied.
    fn write_binary_array(
        &mut self,
        data: &[f64],
        config: &BinaryArrayConfig,
        array_accession: &str,
        array_name: &str,
    ) -> Result<(), ConsumerError> {
        let (text, effective) = encode_array(data, config)?;

        let mut bda = BytesStart::new("binaryDataArray");
        let encoded_length = text.len().to_string();
        bda.push_attribute(("encodedLength", encoded_length.as_str()));
        self.write_event(Event::Start(bda))?;

        self.write_encoding_params(&effective)?;
        self.write_cv_param(array_accession, array_name, None)?;

        self.write_event(Event::Start(BytesStart::new("binary")))?;
        if !text.is_empty() {
            self.write_event(Event::Text(BytesText::new(&text)))?;
        }
        self.write_event(Event::End(BytesEnd::new("binary")))?;
        self.write_event(Event::End(BytesEnd::new("binaryDataArray")))?;
        Ok(())
    }

    fn write_encoding_params(&mut self, effective: &EffectiveEncoding) -> Result<(), ConsumerError> {
        match effective.numpress {
            NumpressKind::None => {
                let (acc, name) = match effective.precision {
                    Precision::Float32 => (cv::FLOAT_32, "32-bit float"),
                    Precision::Float64 => (cv::FLOAT_64, "64-bit float"),
                };
                self.write_cv_param(acc, name, None)?;
            }
            NumpressKind::Linear => {
                self.write_cv_param(cv::NUMPRESS_LINEAR, "MS-Numpress linear prediction compression", None)?
            }
            NumpressKind::Pic => {
                self.write_cv_param(cv::NUMPRESS_PIC, "MS-Numpress positive integer compression", None)?
            }
            NumpressKind::Slof => {
                self.write_cv_param(cv::NUMPRESS_SLOF, "MS-Numpress short logged float compression", None)?
            }
        }
        if effective.zlib {
            self.write_cv_param(cv::ZLIB_COMPRESSION, "zlib compression", None)?;
        } else {
            self.write_cv_param(cv::NO_COMPRESSION, "no compression", None)?;
        }
        Ok(())
    }

    fn mz_axis_config(&self) -> BinaryArrayConfig {
        BinaryArrayConfig {
            numpress: self.options.numpress_mass_time,
            zlib: self.options.zlib_compression,
            precision: if self.options.mz_32_bit {
                Precision::Float32
            } else {
                Precision::Float64
            },
        }
    }

    fn intensity_axis_config(&self) -> BinaryArrayConfig {
        BinaryArrayConfig {
            numpress: self.options.numpress_intensity,
            zlib: self.options.zlib_compression,
            precision: if self.options.intensity_32_bit {
                Precision::Float32
            } else {
                Precision::Float64
            },
        }
    }

    fn write_spectrum(&mut self, spectrum: &Spectrum) -> Result<(), ConsumerError> {
        let mut spec = BytesStart::new("spectrum");
        let index = self.spectra_written.to_string();
        let length = spectrum.peaks.len().to_string();
        spec.push_attribute(("index", index.as_str()));
        spec.push_attribute(("id", spectrum.native_id.as_str()));
        spec.push_attribute(("defaultArrayLength", length.as_str()));
        if self.additional_data_processing.is_some() {
            spec.push_attribute(("dataProcessingRef", "DP_extra"));
        }
        self.write_event(Event::Start(spec))?;

        if spectrum.ms_level <= 1 {
            self.write_cv_param(cv::MS1_SPECTRUM, "MS1 spectrum", None)?;
        } else {
            self.write_cv_param(cv::MSN_SPECTRUM, "MSn spectrum", None)?;
        }
        let level = spectrum.ms_level.to_string();
        self.write_cv_param(cv::MS_LEVEL, "ms level", Some(&level))?;
        self.write_cv_param(cv::CENTROID_SPECTRUM, "centroid spectrum", None)?;
        let tic = format!("{:.4}", spectrum.total_ion_current());
        self.write_cv_param(cv::TOTAL_ION_CURRENT, "total ion current", Some(&tic))?;

        let mut scan_list = BytesStart::new("scanList");
        scan_list.push_attribute(("count", "1"));
        self.write_event(Event::Start(scan_list))?;
        self.write_event(Event::Start(BytesStart::new("scan")))?;
        let rt = format!("{:.6}", spectrum.rt);
        self.write_cv_param_with_unit(cv::SCAN_START_TIME, "scan start time", &rt, cv::UNIT_SECOND, "second")?;
        self.write_event(Event::End(BytesEnd::new("scan")))?;
        self.write_event(Event::End(BytesEnd::new("scanList")))?;

        if !spectrum.precursors.is_empty() {
            let precursors = spectrum.precursors.clone();
            let mut pl = BytesStart::new("precursorList");
            let count = precursors.len().to_string();
            pl.push_attribute(("count", count.as_str()));
            self.write_event(Event::Start(pl))?;
            for precursor in &precursors {
                self.write_precursor(precursor)?;
            }
            self.write_event(Event::End(BytesEnd::new("precursorList")))?;
        }

        let mzs: Vec<f64> = spectrum.peaks.iter().map(|p| p.mz).collect();
        let intensities: Vec<f64> = spectrum.peaks.iter().map(|p| p.intensity as f64).collect();
        let mut bdal = BytesStart::new("binaryDataArrayList");
        bdal.push_attribute(("count", "2"));
        self.write_event(Event::Start(bdal))?;
        let mz_config = self.mz_axis_config();
        self.write_binary_array(&mzs, &mz_config, cv::MZ_ARRAY, "m/z array")?;
        let int_config = self.intensity_axis_config();
        self.write_binary_array(&intensities, &int_config, cv::INTENSITY_ARRAY, "intensity array")?;
        self.write_event(Event::End(BytesEnd::new("binaryDataArrayList")))?;

        self.write_event(Event::End(BytesEnd::new("spectrum")))?;
        Ok(())
    }

    fn write_precursor(&mut self, precursor: &Precursor) -> Result<(), ConsumerError> {
        self.write_event(Event::Start(BytesStart::new("precursor")))?;

        if precursor.isolation_window_lower.is_some() || precursor.isolation_window_upper.is_some()
        {
            self.write_event(Event::Start(BytesStart::new("isolationWindow")))?;
            let target = format!("{:.10}", precursor.mz);
            self.write_cv_param(cv::ISOLATION_WINDOW_TARGET, "isolation window target m/z", Some(&target))?;
            if let Some(lower) = precursor.isolation_window_lower {
                let lower = format!("{lower:.6}");
                self.write_cv_param(cv::ISOLATION_WINDOW_LOWER, "isolation window lower offset", Some(&lower))?;
            }
            if let Some(upper) = precursor.isolation_window_upper {
                let upper = format!("{upper:.6}");
                self.write_cv_param(cv::ISOLATION_WINDOW_UPPER, "isolation window upper offset", Some(&upper))?;
            }
            self.write_event(Event::End(BytesEnd::new("isolationWindow")))?;
        }

        let mut sil = BytesStart::new("selectedIonList");
        sil.push_attribute(("count", "1"));
        self.write_event(Event::Start(sil))?;
        self.write_event(Event::Start(BytesStart::new("selectedIon")))?;
        let mz = format!("{:.10}", precursor.mz);
        self.write_cv_param(cv::SELECTED_ION_MZ, "selected ion m/z", Some(&mz))?;
        if let Some(intensity) = precursor.intensity {
            let intensity = format!("{intensity:.4}");
            self.write_cv_param(cv::PEAK_INTENSITY, "peak intensity", Some(&intensity))?;
        }
        if let Some(charge) = precursor.charge {
            let charge = charge.to_string();
            self.write_cv_param(cv::CHARGE_STATE, "charge state", Some(&charge))?;
        }
        self.write_event(Event::End(BytesEnd::new("selectedIon")))?;
        self.write_event(Event::End(BytesEnd::new("selectedIonList")))?;

        self.write_event(Event::End(BytesEnd::new("precursor")))?;
        Ok(())
    }

    fn write_chromatogram(&mut self, chromatogram: &Chromatogram) -> Result<(), ConsumerError> {
        let mut chrom = BytesStart::new("chromatogram");
        let index = self.chromatograms_written.to_string();
        let length = chromatogram.points.len().to_string();
        chrom.push_attribute(("index", index.as_str()));
        chrom.push_attribute(("id", chromatogram.native_id.as_str()));
        chrom.push_attribute(("defaultArrayLength", length.as_str()));
        if self.additional_data_processing.is_some() {
            chrom.push_attribute(("dataProcessingRef", "DP_extra"));
        }
        self.write_event(Event::Start(chrom))?;

        if chromatogram.precursor_mz.is_some() {
            self.write_cv_param(cv::SRM_CHROMATOGRAM, "selected reaction monitoring chromatogram", None)?;
        } else {
            self.write_cv_param(cv::TIC_CHROMATOGRAM, "total ion current chromatogram", None)?;
        }

        let times: Vec<f64> = chromatogram.points.iter().map(|p| p.rt).collect();
        let intensities: Vec<f64> = chromatogram
            .points
            .iter()
            .map(|p| p.intensity as f64)
            .collect();
        let mut bdal = BytesStart::new("binaryDataArrayList");
        bdal.push_attribute(("count", "2"));
        self.write_event(Event::Start(bdal))?;
        let time_config = self.mz_axis_config();
        self.write_binary_array(&times, &time_config, cv::TIME_ARRAY, "time array")?;
        let int_config = self.intensity_axis_config();
        self.write_binary_array(&intensities, &int_config, cv::INTENSITY_ARRAY, "intensity array")?;
        self.write_event(Event::End(BytesEnd::new("binaryDataArrayList")))?;

        self.write_event(Event::End(BytesEnd::new("chromatogram")))?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), ConsumerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !self.started_writing {
            // No items consumed: still produce a valid, empty file.
            self.write_header()?;
            let mut list = BytesStart::new("spectrumList");
            list.push_attribute(("count", "0"));
            self.write_event(Event::Start(list))?;
            self.write_event(Event::End(BytesEnd::new("spectrumList")))?;
        } else if self.writing_spectra {
            self.write_event(Event::End(BytesEnd::new("spectrumList")))?;
        } else if self.writing_chromatograms {
            self.write_event(Event::End(BytesEnd::new("chromatogramList")))?;
        }
        self.writing_spectra = false;
        self.writing_chromatograms = false;

        self.write_event(Event::End(BytesEnd::new("run")))?;
        self.write_event(Event::End(BytesEnd::new("mzML")))?;

        if self.options.write_index {
            let index_list_offset = self.writer.get_ref().position();

            let mut idx_list = BytesStart::new("indexList");
            idx_list.push_attribute(("count", "2"));
            self.write_event(Event::Start(idx_list))?;
            let spectrum_offsets = std::mem::take(&mut self.spectrum_offsets);
            self.write_index("spectrum", &spectrum_offsets)?;
            let chromatogram_offsets = std::mem::take(&mut self.chromatogram_offsets);
            self.write_index("chromatogram", &chromatogram_offsets)?;
            self.write_event(Event::End(BytesEnd::new("indexList")))?;

            self.write_event(Event::Start(BytesStart::new("indexListOffset")))?;
            let offset = index_list_offset.to_string();
            self.write_event(Event::Text(BytesText::new(&offset)))?;
            self.write_event(Event::End(BytesEnd::new("indexListOffset")))?;

            // SHA-1 of everything before the checksum element itself.
            self.write_event(Event::Start(BytesStart::new("fileChecksum")))?;
            let hash = self.writer.get_ref().hash_hex();
            self.write_event(Event::Text(BytesText::new(&hash)))?;
            self.write_event(Event::End(BytesEnd::new("fileChecksum")))?;

            self.write_event(Event::End(BytesEnd::new("indexedmzML")))?;
        }

        self.writer.get_mut().flush()?;
        Ok(())
    }

    fn write_index(&mut self, name: &str, offsets: &[(String, u64)]) -> Result<(), ConsumerError> {
        let mut index = BytesStart::new("index");
        index.push_attribute(("name", name));
        self.write_event(Event::Start(index))?;
        for (id, offset) in offsets {
            let mut entry = BytesStart::new("offset");
            entry.push_attribute(("idRef", id.as_str()));
            self.write_event(Event::Start(entry))?;
            let offset = offset.to_string();
            self.write_event(Event::Text(BytesText::new(&offset)))?;
            self.write_event(Event::End(BytesEnd::new("offset")))?;
        }
        self.write_event(Event::End(BytesEnd::new("index")))?;
        Ok(())
    }
}

impl<W: Write> MsDataConsumer for MzMLWriter<W> {
    fn set_experimental_settings(&mut self, settings: &ExperimentalSettings) {
        self.settings = settings.clone();
    }

    fn set_expected_size(&mut self, n_spectra: usize, n_chromatograms: usize) {
        self.spectra_expected = n_spectra;
        self.chromatograms_expected = n_chromatograms;
    }

    fn consume_spectrum(&mut self, mut spectrum: Spectrum) -> Result<(), ConsumerError> {
        if self.closed {
            return Err(ConsumerError::NotReady("writer already closed"));
        }
        if self.writing_chromatograms {
            return Err(ConsumerError::MisorderedStream);
        }
        if !self.started_writing {
            self.write_header()?;
            let mut list = BytesStart::new("spectrumList");
            let count = self.spectra_expected.to_string();
            list.push_attribute(("count", count.as_str()));
            self.write_event(Event::Start(list))?;
            self.writing_spectra = true;
        }

        if let Some(processor) = self.spectrum_processor.as_mut() {
            processor(&mut spectrum);
        }

        if self.options.write_index {
            let offset = self.writer.get_ref().position();
            self.spectrum_offsets
                .push((spectrum.native_id.clone(), offset));
        }
        self.write_spectrum(&spectrum)?;
        self.spectra_written += 1;
        Ok(())
    }

    fn consume_chromatogram(&mut self, mut chromatogram: Chromatogram) -> Result<(), ConsumerError> {
        if self.closed {
            return Err(ConsumerError::NotReady("writer already closed"));
        }
        if !self.started_writing {
            self.write_header()?;
        } else if self.writing_spectra {
            self.write_event(Event::End(BytesEnd::new("spectrumList")))?;
            self.writing_spectra = false;
        }
        if !self.writing_chromatograms {
            let mut list = BytesStart::new("chromatogramList");
            let count = self.chromatograms_expected.to_string();
            list.push_attribute(("count", count.as_str()));
            self.write_event(Event::Start(list))?;
            self.writing_chromatograms = true;
        }

        if let Some(processor) = self.chromatogram_processor.as_mut() {
            processor(&mut chromatogram);
        }

        if self.options.write_index {
            let offset = self.writer.get_ref().position();
            self.chromatogram_offsets
                .push((chromatogram.native_id.clone(), offset));
        }
        self.write_chromatogram(&chromatogram)?;
        self.chromatograms_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConsumerError> {
        self.finalize()
    }
}

impl<W: Write> Drop for MzMLWriter<W> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.finalize() {
                log::error!("failed to finalise mzML output: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Peak1D;

    fn sample_spectrum(id: &str, rt: f64) -> Spectrum {
        let mut s = Spectrum::new(id, 1, rt);
        s.peaks = vec![
            Peak1D {
                mz: 100.0,
                intensity: 10.0,
            },
            Peak1D {
                mz: 200.0,
                intensity: 20.0,
            },
        ];
        s
    }

    fn writer_output(f: impl FnOnce(&mut MzMLWriter<&mut Vec<u8>>)) -> String {
        let mut buf = Vec::new();
        {
            let mut writer = MzMLWriter::new(&mut buf, PeakFileOptions::default());
            f(&mut writer);
            writer.close().unwrap();
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn spectrum_after_chromatogram_is_fatal() {
        let mut buf = Vec::new();
        let mut writer = MzMLWriter::new(&mut buf, PeakFileOptions::default());
        writer
            .consume_chromatogram(Chromatogram::new("TIC"))
            .unwrap();
        let err = writer.consume_spectrum(sample_spectrum("scan=1", 1.0));
        assert!(matches!(err, Err(ConsumerError::MisorderedStream)));
    }

    #[test]
    fn indexed_output_has_offsets_and_checksum() {
        let xml = writer_output(|w| {
            w.set_expected_size(2, 0);
            w.consume_spectrum(sample_spectrum("scan=1", 1.0)).unwrap();
            w.consume_spectrum(sample_spectrum("scan=2", 2.0)).unwrap();
        });
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<indexedmzML"));
        assert!(xml.contains("<spectrumList count=\"2\""));
        assert!(xml.contains("idRef=\"scan=1\""));
        assert!(xml.contains("<indexListOffset>"));
        assert!(xml.contains("<fileChecksum>"));

        // The recorded offset points exactly at the spectrum start tag.
        let offset_text = xml
            .split("<offset idRef=\"scan=1\">")
            .nth(1)
            .and_then(|s| s.split("</offset>").next())
            .unwrap();
        let offset: usize = offset_text.parse().unwrap();
        assert!(xml[offset..].starts_with("<spectrum "));
    }

    #[test]
    fn checksum_matches_content_before_element() {
        let xml = writer_output(|w| {
            w.consume_spectrum(sample_spectrum("scan=1", 1.0)).unwrap();
        });
        let pos = xml.find("<fileChecksum>").unwrap();
        let written_hash = xml
            .split("<fileChecksum>")
            .nth(1)
            .and_then(|s| s.split("</fileChecksum>").next())
            .unwrap();
        let mut hasher = Sha1::new();
        hasher.update(&xml.as_bytes()[..pos + "<fileChecksum>".len()]);
        let expected: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        assert_eq!(written_hash, expected);
    }

    #[test]
    fn empty_close_produces_valid_skeleton() {
        let xml = writer_output(|_| {});
        assert!(xml.contains("<spectrumList count=\"0\""));
        assert!(xml.contains("</mzML>"));
    }

    #[test]
    fn data_processing_is_stamped_on_items() {
        let xml = writer_output(|w| {
            w.add_data_processing("precursor recalibration");
            w.consume_spectrum(sample_spectrum("scan=1", 1.0)).unwrap();
        });
        assert!(xml.contains("dataProcessingRef=\"DP_extra\""));
        assert!(xml.contains("precursor recalibration"));
    }

    #[test]
    fn numpress_cv_params_reflect_effective_encoding() {
        use crate::io::numpress::{NumpressConfig, NumpressKind};
        let mut options = PeakFileOptions::default();
        options.numpress_mass_time = NumpressConfig::with_kind(NumpressKind::Linear);
        let mut buf = Vec::new();
        {
            let mut writer = MzMLWriter::new(&mut buf, options);
            writer
                .consume_spectrum(sample_spectrum("scan=1", 1.0))
                .unwrap();
            writer.close().unwrap();
        }
        let xml = String::from_utf8(buf).unwrap();
        assert!(xml.contains(cv::NUMPRESS_LINEAR));
        // Intensity axis stays a plain float array.
        assert!(xml.contains(cv::FLOAT_32));
    }
}

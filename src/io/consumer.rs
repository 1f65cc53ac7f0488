//! Push-based consumer interface for streaming spectra and chromatograms.
//!
//! A reader drives any [`MsDataConsumer`]; writers for different output
//! formats are swapped behind the trait, which keeps memory bounded and
//! turns format conversion into pipeline composition.
//!
//! The contract:
//!
//! ```text
//! set_experimental_settings(settings)
//! set_expected_size(n_spectra, n_chromatograms)
//! consume_spectrum(s)        // many times
//! consume_chromatogram(c)    // many times
//! close()                    // finalises the output, also run on Drop
//! ```
//!
//! Once a chromatogram has been consumed, no further spectrum may be
//! accepted: the on-disk lists and index would become inconsistent, so
//! writers treat this as fatal.

use crate::model::{Chromatogram, ExperimentalSettings, Spectrum};

use super::binary::BinaryCodecError;

/// Errors surfaced by consumers.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// A spectrum arrived after chromatogram writing had started
    #[error("misordered stream: spectrum consumed after chromatograms started")]
    MisorderedStream,

    /// Items were consumed before the consumer was configured
    #[error("consumer not ready: {0}")]
    NotReady(&'static str),

    /// Underlying file or database I/O failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary payload encoding failed
    #[error(transparent)]
    Codec(#[from] BinaryCodecError),

    /// Back-end specific failure (XML serialisation, SQL, ...)
    #[error("{0}")]
    Backend(String),
}

/// Narrow push interface implemented by all writing back-ends.
pub trait MsDataConsumer {
    /// Provide the run-level settings used for the output header. Must be
    /// called before the first consumed item takes effect.
    fn set_experimental_settings(&mut self, settings: &ExperimentalSettings);

    /// Announce how many spectra and chromatograms will follow. The counts
    /// are written into list headers and are not enforced.
    fn set_expected_size(&mut self, n_spectra: usize, n_chromatograms: usize);

    /// Consume one spectrum. Fails with
    /// [`ConsumerError::MisorderedStream`] after the first chromatogram.
    fn consume_spectrum(&mut self, spectrum: Spectrum) -> Result<(), ConsumerError>;

    /// Consume one chromatogram.
    fn consume_chromatogram(&mut self, chromatogram: Chromatogram) -> Result<(), ConsumerError>;

    /// Finalise the output. Writers also invoke this from `Drop`,
    /// swallowing errors; call it explicitly to observe them.
    fn close(&mut self) -> Result<(), ConsumerError>;
}

/// A consumer that discards everything.
///
/// Useful where a pipeline stage requires a consumer but no output is
/// wanted, e.g. when only the side effects of reading are of interest.
#[derive(Debug, Default)]
pub struct NoopConsumer {
    spectra_seen: usize,
    chromatograms_seen: usize,
}

impl NoopConsumer {
    /// Create a discarding consumer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spectra discarded so far.
    pub fn spectra_seen(&self) -> usize {
        self.spectra_seen
    }

    /// Number of chromatograms discarded so far.
    pub fn chromatograms_seen(&self) -> usize {
        self.chromatograms_seen
    }
}

impl MsDataConsumer for NoopConsumer {
    fn set_experimental_settings(&mut self, _settings: &ExperimentalSettings) {}

    fn set_expected_size(&mut self, _n_spectra: usize, _n_chromatograms: usize) {}

    fn consume_spectrum(&mut self, _spectrum: Spectrum) -> Result<(), ConsumerError> {
        self.spectra_seen += 1;
        Ok(())
    }

    fn consume_chromatogram(&mut self, _chromatogram: Chromatogram) -> Result<(), ConsumerError> {
        self.chromatograms_seen += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConsumerError> {
        Ok(())
    }
}

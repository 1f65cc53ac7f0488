//! # mzML I/O
//!
//! Streaming reading and writing of mzML, the XML-based community standard
//! for mass spectrometry data defined by HUPO-PSI.
//!
//! ```text
//! indexedmzML (optional wrapper)
//! └── mzML
//!     ├── cvList
//!     ├── fileDescription
//!     ├── softwareList
//!     ├── instrumentConfigurationList
//!     ├── dataProcessingList
//!     └── run
//!         ├── spectrumList
//!         │   └── spectrum* → binaryDataArrayList → binaryDataArray*
//!         └── chromatogramList
//! ```
//!
//! The writer is a push consumer ([`crate::io::MsDataConsumer`]); the
//! reader is a pull parser that can also drive any consumer, turning
//! format conversion into pipeline composition.

pub mod cv;
mod reader;
mod writer;

pub use reader::{
    load_experiment, transfer, transfer_with_counts, MzMLError, MzMLItem, MzMLReader,
};
pub use writer::{ChromatogramProcessor, MzMLWriter, SpectrumProcessor};

//! File formats and the streaming consumer chain.
//!
//! The data plane is push-based: a reader drives an [`MsDataConsumer`],
//! and the mzML / sqMass writers sit behind that trait. The codec stack
//! ([`numpress`] + [`binary`]) is shared by both back-ends.

pub mod binary;
pub mod consumer;
pub mod featurexml;
pub mod mzml;
pub mod numpress;
pub mod options;
pub mod sqmass;

pub use consumer::{ConsumerError, MsDataConsumer, NoopConsumer};
pub use options::{PeakFileOptions, Range};

//! PSI-MS controlled vocabulary accessions used by the mzML reader and
//! writer.

/// MS controlled vocabulary reference id
pub const CV_MS: &str = "MS";
/// Unit ontology reference id
pub const CV_UO: &str = "UO";

// Binary array encodings
/// 32-bit float
pub const FLOAT_32: &str = "MS:1000521";
/// 64-bit float
pub const FLOAT_64: &str = "MS:1000523";
/// zlib compression
pub const ZLIB_COMPRESSION: &str = "MS:1000574";
/// no compression
pub const NO_COMPRESSION: &str = "MS:1000576";
/// MS-Numpress linear prediction compression
pub const NUMPRESS_LINEAR: &str = "MS:1002312";
/// MS-Numpress positive integer compression
pub const NUMPRESS_PIC: &str = "MS:1002313";
/// MS-Numpress short logged float compression
pub const NUMPRESS_SLOF: &str = "MS:1002314";

// Binary array contents
/// m/z array
pub const MZ_ARRAY: &str = "MS:1000514";
/// intensity array
pub const INTENSITY_ARRAY: &str = "MS:1000515";
/// time array
pub const TIME_ARRAY: &str = "MS:1000595";

// Spectrum descriptors
/// MS1 spectrum
pub const MS1_SPECTRUM: &str = "MS:1000579";
/// MSn spectrum
pub const MSN_SPECTRUM: &str = "MS:1000580";
/// ms level
pub const MS_LEVEL: &str = "MS:1000511";
/// centroid spectrum
pub const CENTROID_SPECTRUM: &str = "MS:1000127";
/// scan start time
pub const SCAN_START_TIME: &str = "MS:1000016";
/// total ion current
pub const TOTAL_ION_CURRENT: &str = "MS:1000285";

// Precursor descriptors
/// selected ion m/z
pub const SELECTED_ION_MZ: &str = "MS:1000744";
/// peak intensity
pub const PEAK_INTENSITY: &str = "MS:1000042";
/// charge state
pub const CHARGE_STATE: &str = "MS:1000041";
/// isolation window target m/z
pub const ISOLATION_WINDOW_TARGET: &str = "MS:1000827";
/// isolation window lower offset
pub const ISOLATION_WINDOW_LOWER: &str = "MS:1000828";
/// isolation window upper offset
pub const ISOLATION_WINDOW_UPPER: &str = "MS:1000829";

// Chromatogram descriptors
/// total ion current chromatogram
pub const TIC_CHROMATOGRAM: &str = "MS:1000235";
/// selected reaction monitoring chromatogram
pub const SRM_CHROMATOGRAM: &str = "MS:1001473";

// Units
/// second
pub const UNIT_SECOND: &str = "UO:0000010";
/// minute
pub const UNIT_MINUTE: &str = "UO:0000031";

// Processing
/// conversion to mzML
pub const CONVERSION_TO_MZML: &str = "MS:1000544";
/// data processing action
pub const DATA_PROCESSING_ACTION: &str = "MS:1000543";

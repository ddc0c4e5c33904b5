use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PgenError {
    #[error("Failed to open '{}'", path.display())]
    Open{path: PathBuf, #[source] source: std::io::Error},

    #[error("'{}' is not a PGEN file (bad magic number)", path.display())]
    BadMagic{path: PathBuf},

    #[error("'{}' is too short to hold a PGEN header", path.display())]
    TruncatedHeader{path: PathBuf},

    #[error("Unsupported PGEN storage mode {mode:#04x}")]
    UnsupportedMode{mode: u8},

    #[error("Storage mode {mode:#04x} does not embed variant/sample counts; sidecar counts are required")]
    MissingCountHints{mode: u8},

    #[error("'{}' holds {actual} bytes of record data, but the header implies {expected}", path.display())]
    GeometryMismatch{path: PathBuf, expected: u64, actual: u64},

    #[error("Failed to read the record of variant {vidx}")]
    RecordRead{vidx: u32, #[source] source: std::io::Error},

    #[error("Record of variant {vidx} is {len} bytes, shorter than its {need}-byte genotype track")]
    TruncatedRecord{vidx: u32, len: usize, need: usize},

    #[error("Variant index {vidx} is out of bounds ({variant_ct} variants)")]
    VariantOutOfRange{vidx: u32, variant_ct: u32},

    #[error("Variant {vidx} uses compressed record representation {vrtype:#04x}, which this reader does not support")]
    UnsupportedVrtype{vidx: u32, vrtype: u8},

    #[error("This reader does not implement {feature}")]
    NotImplemented{feature: &'static str},

    #[error("Aligned allocation of {bytes} bytes failed")]
    Alloc{bytes: usize},

    #[error("Sample index {idx} is out of bounds ({raw_sample_ct} samples)")]
    SampleOutOfRange{idx: u32, raw_sample_ct: u32},

    #[error("Sample subset indices must be strictly increasing (saw {idx} after {prev})")]
    UnsortedSubset{prev: u32, idx: u32},

    #[error("Sample subset was built over {subset} samples, but the file holds {raw}")]
    SubsetMismatch{subset: u32, raw: u32},
}

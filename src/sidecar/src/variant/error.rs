use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VariantMetaError {
    #[error("Failed to open '{}'", path.display())]
    Open{path: PathBuf, #[source] source: std::io::Error},

    #[error("'{}' holds no variant records", path.display())]
    Empty{path: PathBuf},

    #[error("'{}' starts with an unrecognized header line", path.display())]
    UnexpectedHeader{path: PathBuf},

    #[error("Required column '{name}' is missing from '{}'", path.display())]
    MissingColumn{path: PathBuf, name: &'static str},

    #[error("Line {line} has too few fields ({have}, expected at least {need})")]
    TooFewFields{line: usize, have: usize, need: usize},

    #[error("Could not parse '{value}' as a position on line {line}")]
    BadPosition{line: usize, value: String},

    #[error("Could not parse '{value}' as a centimorgan coordinate on line {line}")]
    BadCm{line: usize, value: String},

    #[error("Variant index {vidx} is out of bounds ({variant_ct} variants)")]
    OutOfBounds{vidx: u32, variant_ct: u32},
}

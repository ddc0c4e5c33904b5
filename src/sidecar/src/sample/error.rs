use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SampleMetaError {
    #[error("Failed to open '{}'", path.display())]
    Open{path: PathBuf, #[source] source: std::io::Error},

    #[error("'{}' holds no sample records", path.display())]
    Empty{path: PathBuf},

    #[error("'{}' has no IID column", path.display())]
    MissingIid{path: PathBuf},

    #[error("Line {line} has too few fields ({have}, expected {need})")]
    TooFewFields{line: usize, have: usize, need: usize},

    #[error("Could not parse '{value}' as a sex code on line {line} (expected 1, 2 or a missing marker)")]
    BadSex{line: usize, value: String},

    #[error("Duplicate sample id '{iid}' on line {line}")]
    DuplicateSample{iid: String, line: usize},
}

//! SQL-style table scans over PLINK 2 genotype datasets.
//!
//! Five scan functions are exposed, each following the same lifecycle the
//! host engine drives: `bind` (resolve files, validate options, fix the
//! output schema), `init_global` (capture the projection), `init_local`
//! (per worker), then repeated `scan` calls filling fixed-capacity output
//! batches. [`exec::run_to_completion`] drives the whole lifecycle on a
//! thread pool for callers without a host engine.
//!
//! - [`freq`]: ALT allele frequency and observation counts.
//! - [`hardy`]: Hardy-Weinberg exact test.
//! - [`missing`]: per-variant or per-sample missingness.
//! - [`ld`]: pairwise or windowed linkage disequilibrium.
//! - [`score`]: polygenic scoring with three missing-dosage policies.

pub mod bind;
pub mod error;
pub mod exec;
pub mod output;
pub mod params;

mod kernels;
pub use kernels::{freq, hardy, ld, missing, score};

pub use error::ErrorKind;
pub use exec::{run_to_completion, BoundScan, ScanContext};
pub use output::{Cell, ColumnDef, LogicalType, OutputBatch, Projection, Schema, ROW_ID_COLUMN};
pub use params::{
    CommonOptions, FreqOptions, HardyOptions, LdOptions, MissingMode, MissingOptions,
    SampleSelector, ScoreOptions, WeightEntry, WeightSpec,
};

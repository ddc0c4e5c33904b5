//! Reader stack for PLINK 2 PGEN genotype files.
//!
//! The crate is split along the reader lifecycle:
//! - [`header`]: two-phase probe/populate of the file header and record
//!   layout tables, shared immutably by every reader.
//! - [`reader`]: per-thread [`PgenReader`] with dense, fast-count,
//!   missingness-only and dosage decode paths.
//! - [`subset`]: precomputed sample-subset descriptor consumed by all of
//!   the above.
//! - [`mem`] / [`codec`]: aligned working buffers and 2-bit lane
//!   primitives.

pub mod codec;
pub mod header;
pub mod mem;
pub mod reader;
pub mod subset;

mod error;
pub use error::PgenError;

pub use codec::{GenoCounts, DOSAGE_MISSING};
pub use header::{HeaderProbe, PgenHeader, StorageMode, PGEN_MAGIC};
pub use reader::{DosageBuf, PgenReader};
pub use subset::{effective_sample_ct, raw_sample_idx, SampleSubset};

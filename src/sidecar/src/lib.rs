//! Text sidecar readers accompanying a PGEN genotype file: variant metadata
//! (PVAR / BIM), sample metadata (PSAM / FAM) and `chrom:start-end` region
//! resolution over the variant index.

pub mod region;
pub mod sample;
pub mod variant;

pub use region::{parse_region, RegionError, VariantRange};
pub use sample::{SampleMeta, SampleMetaError, SampleRecord};
pub use variant::{MetaColumns, VariantField, VariantMeta, VariantMetaError};

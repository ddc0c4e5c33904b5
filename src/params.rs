//! Typed option surfaces of the five scan functions. Scalar coercion of
//! host-supplied values happens upstream; these structs take already-typed
//! parameters.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use sidecar::SampleMeta;

#[derive(Error, Debug)]
pub enum ParamError {
    #[error("The sample list is empty")]
    EmptySampleList,

    #[error("Sample index {idx} is out of range ({raw_sample_ct} samples in the file)")]
    SampleIndexOutOfRange{idx: i64, raw_sample_ct: u32},

    #[error("Unknown sample id '{iid}'")]
    UnknownSampleId{iid: String},

    #[error("Duplicate sample selector '{selector}'")]
    DuplicateSelector{selector: String},

    #[error("Selecting samples by id requires a sample sidecar")]
    SampleSidecarRequired,

    #[error("This function requires a sample sidecar (.psam or .fam)")]
    SampleSidecarMissing,

    #[error("No variant sidecar found next to '{}' (tried .pvar and .bim)", prefix.display())]
    VariantSidecarMissing{prefix: PathBuf},

    #[error("Variant sidecar lists {sidecar} variants, but the genotype file holds {genotype}")]
    VariantCountMismatch{sidecar: u32, genotype: u32},

    #[error("Sample sidecar lists {sidecar} samples, but the genotype file holds {genotype}")]
    SampleCountMismatch{sidecar: u32, genotype: u32},

    #[error("Options '{a}' and '{b}' are mutually exclusive")]
    MutuallyExclusive{a: &'static str, b: &'static str},

    #[error("Required parameter '{name}' is missing")]
    MissingParameter{name: &'static str},

    #[error("Unknown mode '{value}' (expected 'variant' or 'sample')")]
    UnknownMode{value: String},

    #[error("'{name}' must lie in [{low}, {high}] (got {value})")]
    OutOfRangeParameter{name: &'static str, low: f64, high: f64, value: f64},

    #[error("Positional weight list has {have} entries, but the variant range holds {need}")]
    WeightLengthMismatch{have: usize, need: usize},

    #[error("Unknown variant id '{id}'")]
    UnknownVariantId{id: String},

    #[error("Dosage output is not implemented")]
    DosageNotImplemented,
}

/// Options shared by every scan function.
#[derive(Debug, Default, Clone)]
pub struct CommonOptions {
    /// Explicit variant sidecar path; discovered from the genotype path when
    /// absent.
    pub pvar: Option<PathBuf>,
    /// Explicit sample sidecar path; discovered when absent.
    pub psam: Option<PathBuf>,
    /// Sample restriction; all samples when absent.
    pub samples: Option<SampleSelector>,
    /// `chrom:start-end` restriction; the full file when absent.
    pub region: Option<String>,
}

/// Host-supplied sample restriction.
#[derive(Debug, Clone)]
pub enum SampleSelector {
    /// Raw sample indices into the genotype file.
    Indices(Vec<i64>),
    /// Sample ids resolved through the sample sidecar.
    Ids(Vec<String>),
}

/// Resolve a selector to raw sample indices (unsorted, as supplied).
///
/// # Errors
/// `EmptySampleList`, `SampleIndexOutOfRange`, `DuplicateSelector`,
/// `SampleSidecarRequired` or `UnknownSampleId`.
pub fn resolve_sample_indices(
    selector: &SampleSelector,
    raw_sample_ct: u32,
    sample_meta: Option<&SampleMeta>,
) -> Result<Vec<u32>, ParamError> {
    let mut resolved = Vec::new();
    let mut seen = ahash::AHashSet::new();
    match selector {
        SampleSelector::Indices(indices) => {
            if indices.is_empty() {
                return Err(ParamError::EmptySampleList);
            }
            for &idx in indices {
                if idx < 0 || idx >= i64::from(raw_sample_ct) {
                    return Err(ParamError::SampleIndexOutOfRange{idx, raw_sample_ct});
                }
                if !seen.insert(idx as u32) {
                    return Err(ParamError::DuplicateSelector{selector: idx.to_string()});
                }
                resolved.push(idx as u32);
            }
        }
        SampleSelector::Ids(ids) => {
            if ids.is_empty() {
                return Err(ParamError::EmptySampleList);
            }
            let meta = sample_meta.ok_or(ParamError::SampleSidecarRequired)?;
            for iid in ids {
                let idx = meta
                    .iid_to_idx(iid)
                    .ok_or_else(|| ParamError::UnknownSampleId{iid: iid.clone()})?;
                if !seen.insert(idx) {
                    return Err(ParamError::DuplicateSelector{selector: iid.clone()});
                }
                resolved.push(idx);
            }
        }
    }
    Ok(resolved)
}

#[derive(Debug, Default, Clone)]
pub struct FreqOptions {
    pub common: CommonOptions,
    /// Also emit the four genotype-category count columns.
    pub counts: bool,
    /// Reserved; rejected at bind.
    pub dosage: bool,
}

#[derive(Debug, Default, Clone)]
pub struct HardyOptions {
    pub common: CommonOptions,
    /// Apply the mid-p correction to the exact test.
    pub midp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingMode {
    #[default]
    Variant,
    Sample,
}

impl FromStr for MissingMode {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, ParamError> {
        match s {
            "variant" => Ok(Self::Variant),
            "sample" => Ok(Self::Sample),
            other => Err(ParamError::UnknownMode{value: other.to_string()}),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct MissingOptions {
    pub common: CommonOptions,
    pub mode: MissingMode,
}

#[derive(Debug, Clone)]
pub struct LdOptions {
    pub common: CommonOptions,
    /// First variant id of a single-pair query.
    pub variant1: Option<String>,
    /// Second variant id of a single-pair query.
    pub variant2: Option<String>,
    /// Window radius for the sliding scan, in kilobases.
    pub window_kb: u32,
    /// Minimum r-squared an emitted windowed pair must reach.
    pub r2_threshold: f64,
    /// Also pair variants across chromosome boundaries.
    pub inter_chr: bool,
}

impl Default for LdOptions {
    fn default() -> Self {
        Self{
            common: CommonOptions::default(),
            variant1: None,
            variant2: None,
            window_kb: 1000,
            r2_threshold: 0.2,
            inter_chr: false,
        }
    }
}

/// One id-keyed scoring weight.
#[derive(Debug, Clone)]
pub struct WeightEntry {
    pub id: String,
    /// Scored allele, matched against ALT (no flip) then REF (flip).
    pub allele: String,
    pub weight: f64,
}

/// The two accepted weight shapes.
#[derive(Debug, Clone)]
pub enum WeightSpec {
    /// One weight per range variant, positionally.
    Positional(Vec<f64>),
    /// Id-resolved entries.
    Keyed(Vec<WeightEntry>),
}

#[derive(Debug, Default, Clone)]
pub struct ScoreOptions {
    pub common: CommonOptions,
    /// Required; bind rejects its absence.
    pub weights: Option<WeightSpec>,
    /// Variance-standardize dosages before weighting.
    pub center: bool,
    /// Skip missing dosages instead of mean-imputing them.
    pub no_mean_imputation: bool,
}

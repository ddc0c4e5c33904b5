//! Shared bind path: sidecar discovery, header probe/populate, count
//! cross-checks, subset construction and region resolution. Every scan
//! function funnels through [`bind_context`] before adding its own schema
//! and kernel state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use located_error::LocatedError;
use log::{debug, info};

use pgen_io::{HeaderProbe, SampleSubset};
use sidecar::{parse_region, SampleMeta, VariantMeta, VariantRange};

use crate::exec::ScanContext;
use crate::params::{resolve_sample_indices, CommonOptions, ParamError};

/// Sidecar lookup next to the genotype file: explicit path wins, otherwise
/// the genotype extension is replaced by each candidate in turn.
fn discover_sidecar(
    genotype_path: &Path,
    explicit: Option<&Path>,
    extensions: &[&str],
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    for ext in extensions {
        let candidate = genotype_path.with_extension(ext);
        if candidate.is_file() {
            debug!("Discovered sidecar '{}'", candidate.display());
            return Some(candidate);
        }
    }
    None
}

/// Resolve sidecars, probe and populate the genotype header, build the
/// sample subset and the variant range.
///
/// `require_samples` makes the sample sidecar mandatory (sample-oriented
/// kernels emit its fid/iid columns).
pub fn bind_context(
    genotype_path: &Path,
    common: &CommonOptions,
    require_samples: bool,
) -> Result<ScanContext> {
    // ---- Variant sidecar first: `.bed` probes need its count.
    let pvar_path = discover_sidecar(genotype_path, common.pvar.as_deref(), &["pvar", "bim"])
        .ok_or_else(|| ParamError::VariantSidecarMissing{prefix: genotype_path.to_path_buf()})
        .loc("While resolving the variant sidecar")?;
    let meta = VariantMeta::load(&pvar_path)
        .with_loc(|| format!("While loading variant sidecar '{}'", pvar_path.display()))?;

    let psam_path = discover_sidecar(genotype_path, common.psam.as_deref(), &["psam", "fam"]);
    if require_samples && psam_path.is_none() {
        return Err(ParamError::SampleSidecarMissing).loc("While resolving the sample sidecar");
    }
    let samples = match &psam_path {
        Some(path) => Some(
            SampleMeta::load(path)
                .with_loc(|| format!("While loading sample sidecar '{}'", path.display()))?,
        ),
        None => None,
    };

    // ---- Two-phase header initialization; the probe handle dies here.
    let counts_hint = samples
        .as_ref()
        .map(|s| (meta.variant_ct(), s.sample_ct()));
    let probe = HeaderProbe::new(genotype_path, counts_hint)
        .with_loc(|| format!("While probing '{}'", genotype_path.display()))?;
    let header = probe
        .populate()
        .with_loc(|| format!("While populating the header of '{}'", genotype_path.display()))?;

    // ---- Sidecar / genotype agreement.
    if meta.variant_ct() != header.raw_variant_ct() {
        return Err(ParamError::VariantCountMismatch{
            sidecar: meta.variant_ct(),
            genotype: header.raw_variant_ct(),
        })
        .loc("While cross-checking the variant sidecar");
    }
    if let Some(samples) = &samples {
        if samples.sample_ct() != header.raw_sample_ct() {
            return Err(ParamError::SampleCountMismatch{
                sidecar: samples.sample_ct(),
                genotype: header.raw_sample_ct(),
            })
            .loc("While cross-checking the sample sidecar");
        }
    }

    // ---- Sample restriction.
    let subset = match &common.samples {
        Some(selector) => {
            let indices = resolve_sample_indices(selector, header.raw_sample_ct(), samples.as_ref())
                .loc("While resolving the sample restriction")?;
            Some(Arc::new(
                SampleSubset::build(header.raw_sample_ct(), indices)
                    .loc("While building the sample subset")?,
            ))
        }
        None => None,
    };

    // ---- Region restriction.
    let range = match &common.region {
        Some(spec) => parse_region(&meta, spec)
            .with_loc(|| format!("While resolving region '{spec}'"))?,
        None => VariantRange::full(meta.variant_ct()),
    };

    let cols = meta
        .columns()
        .loc("While materializing variant metadata columns")?;

    info!(
        "Bound '{}': {} variants in range, {} effective samples",
        genotype_path.display(),
        range.len(),
        pgen_io::effective_sample_ct(subset.as_deref(), header.raw_sample_ct()),
    );
    Ok(ScanContext{
        header: Arc::new(header),
        meta: Arc::new(meta),
        cols: Arc::new(cols),
        samples: samples.map(Arc::new),
        subset,
        range,
        schema: Vec::new(),
    })
}

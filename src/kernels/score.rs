//! Polygenic-score kernel: a serialized scoring pass accumulating weighted
//! dosages per sample, then parallel row emission. Three missing-dosage
//! policies: mean imputation (default), skip, or variance standardization.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use located_error::LocatedError;
use log::debug;
use parking_lot::Mutex;

use pgen_io::{DosageBuf, PgenReader, DOSAGE_MISSING};

use crate::bind::bind_context;
use crate::exec::{BoundScan, Kernel, ScanArgs, ScanContext};
use crate::output::{Cell, ColumnDef, LogicalType, OutputBatch, Projection};
use crate::params::{ParamError, ScoreOptions, WeightSpec};

/// First score-dependent column: `allele_ct`.
const GENO_COLUMNS_FROM: usize = 2;

/// One variant of the resolved scoring set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredVariant {
    pub vidx: u32,
    pub weight: f64,
    /// Score the REF allele instead of ALT.
    pub flip: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScorePolicy {
    MeanImpute,
    SkipMissing,
    Center,
}

#[derive(Debug)]
pub struct ScoreKernel {
    policy: ScorePolicy,
    scored: Vec<ScoredVariant>,
}

/// Bind a polygenic-score scan over `genotype_path`.
///
/// # Errors
/// `MissingParameter` without `weights`; `MutuallyExclusive` for
/// `center && no_mean_imputation`; `WeightLengthMismatch` for a positional
/// list of the wrong length; everything [`bind_context`] raises.
pub fn bind(genotype_path: &Path, options: ScoreOptions) -> Result<Arc<BoundScan<ScoreKernel>>> {
    if options.center && options.no_mean_imputation {
        return Err(ParamError::MutuallyExclusive{a: "center", b: "no_mean_imputation"})
            .loc("While binding score scan");
    }
    let Some(weights) = &options.weights else {
        return Err(ParamError::MissingParameter{name: "weights"}).loc("While binding score scan");
    };
    let mut ctx = bind_context(genotype_path, &options.common, true).loc("While binding score scan")?;

    let scored = resolve_weights(&ctx, weights).loc("While resolving scoring weights")?;
    debug!("score: {} variants in the scoring set", scored.len());

    let policy = if options.center {
        ScorePolicy::Center
    } else if options.no_mean_imputation {
        ScorePolicy::SkipMissing
    } else {
        ScorePolicy::MeanImpute
    };

    ctx.schema = vec![
        ColumnDef{name: "fid", ty: LogicalType::Utf8},
        ColumnDef{name: "iid", ty: LogicalType::Utf8},
        ColumnDef{name: "allele_ct", ty: LogicalType::Int32},
        ColumnDef{name: "denom", ty: LogicalType::Int32},
        ColumnDef{name: "named_allele_sum", ty: LogicalType::Float64},
        ColumnDef{name: "score_sum", ty: LogicalType::Float64},
        ColumnDef{name: "score_avg", ty: LogicalType::Float64},
    ];
    Ok(Arc::new(BoundScan{ctx, kernel: ScoreKernel{policy, scored}}))
}

/// Resolve either weight shape into a vidx-sorted scoring set with zero
/// weights dropped.
fn resolve_weights(ctx: &ScanContext, weights: &WeightSpec) -> Result<Vec<ScoredVariant>> {
    let mut scored = Vec::new();
    match weights {
        WeightSpec::Positional(values) => {
            let need = ctx.range.len() as usize;
            if values.len() != need {
                return Err(ParamError::WeightLengthMismatch{have: values.len(), need})
                    .loc("While checking the positional weight list");
            }
            for (offset, &weight) in values.iter().enumerate() {
                if weight != 0.0 {
                    scored.push(ScoredVariant{
                        vidx: ctx.range.start + offset as u32,
                        weight,
                        flip: false,
                    });
                }
            }
        }
        WeightSpec::Keyed(entries) => {
            let id_map = ctx.meta.id_map().loc("While indexing variant ids")?;
            let mut skipped_unknown = 0usize;
            let mut skipped_allele = 0usize;
            for entry in entries {
                if entry.weight == 0.0 {
                    continue;
                }
                let Some(&vidx) = id_map.get(&entry.id).filter(|v| ctx.range.contains(**v)) else {
                    skipped_unknown += 1;
                    debug!("score: unknown or out-of-range variant id '{}'", entry.id);
                    continue;
                };
                let v = vidx as usize;
                let flip = if ctx.cols.alts[v].as_deref() == Some(entry.allele.as_str()) {
                    false
                } else if ctx.cols.refs[v] == entry.allele {
                    true
                } else {
                    skipped_allele += 1;
                    debug!(
                        "score: allele '{}' matches neither side of variant '{}'",
                        entry.allele, entry.id
                    );
                    continue;
                };
                scored.push(ScoredVariant{vidx, weight: entry.weight, flip});
            }
            if skipped_unknown + skipped_allele > 0 {
                debug!(
                    "score: dropped {skipped_unknown} unknown-id and {skipped_allele} allele-mismatch entries"
                );
            }
            // Sequential file access wants ascending record order.
            scored.sort_unstable_by_key(|s| s.vidx);
        }
    }
    Ok(scored)
}

/// Per-sample accumulators filled by the scoring pass.
#[derive(Debug)]
pub struct ScoreTotals {
    pub score_sum: Vec<f64>,
    pub named_allele_sum: Vec<f64>,
    pub allele_ct: Vec<u32>,
}

pub struct ScoreGlobal {
    scored_done: AtomicBool,
    totals: Mutex<Option<Arc<ScoreTotals>>>,
}

pub struct ScoreLocal {
    dosages: DosageBuf,
    totals: Option<Arc<ScoreTotals>>,
}

impl ScoreKernel {
    /// The scoring pass. One worker runs it under the lock; the one-shot
    /// flag spares late arrivals the compute branch.
    fn score_samples(
        &self,
        ctx: &ScanContext,
        global: &ScoreGlobal,
        reader: &mut PgenReader,
        local: &mut ScoreLocal,
    ) -> Result<Arc<ScoreTotals>> {
        if let Some(existing) = &local.totals {
            return Ok(Arc::clone(existing));
        }
        if !global.scored_done.load(Ordering::Acquire) {
            let mut guard = global.totals.lock();
            if guard.is_none() {
                let totals = self.run_scoring_pass(ctx, reader, &mut local.dosages)?;
                *guard = Some(Arc::new(totals));
                global.scored_done.store(true, Ordering::Release);
            }
        }
        let published = Arc::clone(
            global.totals.lock().as_ref().expect("totals published under the one-shot flag"),
        );
        local.totals = Some(Arc::clone(&published));
        Ok(published)
    }

    fn run_scoring_pass(
        &self,
        ctx: &ScanContext,
        reader: &mut PgenReader,
        dosages: &mut DosageBuf,
    ) -> Result<ScoreTotals> {
        let n = ctx.effective_sample_ct() as usize;
        let mut totals = ScoreTotals{
            score_sum: vec![0.0; n],
            named_allele_sum: vec![0.0; n],
            allele_ct: vec![0u32; n],
        };
        debug!("score: scoring pass over {} variants x {n} samples", self.scored.len());

        for &ScoredVariant{vidx, weight, flip} in &self.scored {
            reader
                .read_dosages(vidx, dosages)
                .with_loc(|| format!("While reading dosages of variant {vidx}"))?;
            let non_missing = dosages.present_ct;
            if non_missing == 0 {
                continue; // Nothing observed; the variant contributes nowhere.
            }
            let sum_alt: f64 = dosages.dense.iter().sum();
            let mean_alt = sum_alt / f64::from(non_missing);

            match self.policy {
                ScorePolicy::MeanImpute => {
                    for (slot, &dosage) in dosages.doubles.iter().enumerate() {
                        let alt = if dosage == DOSAGE_MISSING { mean_alt } else { dosage };
                        let scored = if flip { 2.0 - alt } else { alt };
                        totals.score_sum[slot] += weight * scored;
                        totals.named_allele_sum[slot] += scored;
                        totals.allele_ct[slot] += 2;
                    }
                }
                ScorePolicy::SkipMissing => {
                    for (slot, &dosage) in dosages.doubles.iter().enumerate() {
                        if dosage == DOSAGE_MISSING {
                            continue;
                        }
                        let scored = if flip { 2.0 - dosage } else { dosage };
                        totals.score_sum[slot] += weight * scored;
                        totals.named_allele_sum[slot] += scored;
                        totals.allele_ct[slot] += 2;
                    }
                }
                ScorePolicy::Center => {
                    let freq = mean_alt / 2.0;
                    let sd = (2.0 * freq * (1.0 - freq)).sqrt();
                    if sd == 0.0 {
                        continue; // Monomorphic; standardization is undefined.
                    }
                    let mean_scored = if flip { 2.0 - mean_alt } else { mean_alt };
                    for (slot, &dosage) in dosages.doubles.iter().enumerate() {
                        if dosage == DOSAGE_MISSING {
                            continue;
                        }
                        let scored = if flip { 2.0 - dosage } else { dosage };
                        totals.score_sum[slot] += weight * (scored - mean_scored) / sd;
                        totals.allele_ct[slot] += 2;
                    }
                }
            }
        }
        Ok(totals)
    }
}

impl Kernel for ScoreKernel {
    type Global = ScoreGlobal;
    type Local = ScoreLocal;

    fn name(&self) -> &'static str {
        "score"
    }

    fn claim_bounds(&self, ctx: &ScanContext) -> (u32, u32) {
        (0, ctx.effective_sample_ct())
    }

    fn needs_genotypes(&self, ctx: &ScanContext, projection: &Projection) -> bool {
        projection.intersects(GENO_COLUMNS_FROM..ctx.schema.len())
    }

    fn max_threads(&self, _ctx: &ScanContext) -> u32 {
        1
    }

    fn init_global(&self, _ctx: &ScanContext, _projection: &Projection) -> Result<ScoreGlobal> {
        Ok(ScoreGlobal{scored_done: AtomicBool::new(false), totals: Mutex::new(None)})
    }

    fn init_local(&self, ctx: &ScanContext, _global: &ScoreGlobal) -> Result<ScoreLocal> {
        Ok(ScoreLocal{
            dosages: DosageBuf::for_samples(ctx.effective_sample_ct()),
            totals: None,
        })
    }

    fn scan(&self, ctx: &ScanContext, mut args: ScanArgs<'_, Self>, out: &mut OutputBatch) -> Result<()> {
        let totals = match args.reader.as_deref_mut() {
            Some(reader) => Some(self.score_samples(ctx, args.global, reader, args.local)?),
            None => None,
        };
        let samples = ctx
            .samples
            .as_deref()
            .expect("score binds with a sample sidecar");

        loop {
            if out.is_full() {
                return Ok(());
            }
            let Some(block) = args.claims.claim(self.claim_batch().min(out.remaining() as u32)) else {
                return Ok(());
            };
            for slot in block {
                let record = samples.get(ctx.raw_sample_idx(slot));
                let s = slot as usize;
                out.write_row(args.projection, i64::from(slot), |col| match col {
                    0 => Cell::opt_str(record.fid.as_deref()),
                    1 => Cell::Str(&record.iid),
                    2 => totals.as_ref().map_or(Cell::Null, |t| Cell::I32(t.allele_ct[s] as i32)),
                    3 => totals.as_ref().map_or(Cell::Null, |t| Cell::I32(t.allele_ct[s] as i32)),
                    4 => totals.as_ref().map_or(Cell::Null, |t| Cell::F64(t.named_allele_sum[s])),
                    5 => totals.as_ref().map_or(Cell::Null, |t| Cell::F64(t.score_sum[s])),
                    6 => totals.as_ref().map_or(Cell::Null, |t| {
                        if t.allele_ct[s] == 0 {
                            Cell::F64(0.0)
                        } else {
                            Cell::F64(t.score_sum[s] / f64::from(t.allele_ct[s]))
                        }
                    }),
                    other => panic!("unknown score column {other}"),
                });
            }
        }
    }
}

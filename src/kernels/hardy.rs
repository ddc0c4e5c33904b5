//! Hardy-Weinberg exact-test kernel.
//!
//! The p-value follows the classic bidirectional recurrence over
//! heterozygote counts: seed the distribution mode with probability 1,
//! extend upward and downward in steps of two, normalize, then sum every
//! configuration no more likely than the observed one.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use located_error::LocatedError;
use pgen_io::GenoCounts;

use crate::bind::bind_context;
use crate::exec::{BoundScan, Kernel, ScanArgs, ScanContext};
use crate::kernels::meta_cell;
use crate::output::{Cell, ColumnDef, LogicalType, OutputBatch, Projection};
use crate::params::HardyOptions;

/// First genotype-dependent column: `hom_ref_ct`.
const GENO_COLUMNS_FROM: usize = 5;

/// Relative slack when comparing configuration probabilities against the
/// observed one, absorbing accumulated rounding error.
const P_TIE_SLACK: f64 = 1e-8;

pub struct HardyKernel {
    midp: bool,
}

/// Bind a Hardy-Weinberg scan over `genotype_path`.
pub fn bind(genotype_path: &Path, options: HardyOptions) -> Result<Arc<BoundScan<HardyKernel>>> {
    let mut ctx = bind_context(genotype_path, &options.common, false)
        .loc("While binding Hardy-Weinberg scan")?;
    ctx.schema = vec![
        ColumnDef{name: "chrom", ty: LogicalType::Utf8},
        ColumnDef{name: "pos", ty: LogicalType::Int32},
        ColumnDef{name: "id", ty: LogicalType::Utf8},
        ColumnDef{name: "ref", ty: LogicalType::Utf8},
        ColumnDef{name: "alt", ty: LogicalType::Utf8},
        ColumnDef{name: "hom_ref_ct", ty: LogicalType::Int32},
        ColumnDef{name: "het_ct", ty: LogicalType::Int32},
        ColumnDef{name: "hom_alt_ct", ty: LogicalType::Int32},
        ColumnDef{name: "o_het", ty: LogicalType::Float64},
        ColumnDef{name: "e_het", ty: LogicalType::Float64},
        ColumnDef{name: "p_hwe", ty: LogicalType::Float64},
    ];
    Ok(Arc::new(BoundScan{ctx, kernel: HardyKernel{midp: options.midp}}))
}

/// Exact HWE p-value for observed genotype counts.
///
/// All-missing input (`0, 0, 0`) returns 1.0 by convention; the result is
/// clamped to `[0, 1]`.
pub fn hwe_exact(hom_ref: u32, het: u32, hom_alt: u32, midp: bool) -> f64 {
    let genotypes = u64::from(hom_ref) + u64::from(het) + u64::from(hom_alt);
    if genotypes == 0 {
        return 1.0;
    }
    let rare = 2 * u64::from(hom_ref.min(hom_alt)) + u64::from(het);
    let common = 2 * u64::from(hom_ref.max(hom_alt)) + u64::from(het);

    // Distribution mode, shifted to share parity with the rare-allele count.
    let mut mid = (rare * common / (2 * genotypes)) as i64;
    if mid % 2 != (rare % 2) as i64 {
        mid += 1;
    }

    let rare = rare as i64;
    let common = common as i64;
    let mut probs = vec![0.0f64; rare as usize + 1];
    probs[mid as usize] = 1.0;
    let mut total = 1.0f64;

    // ---- Upward from the mode: trade two homozygotes for two heterozygotes.
    let mut k = mid;
    while k + 2 <= rare {
        let hom_r = (rare - k) / 2;
        let hom_c = (common - k) / 2;
        let next = probs[k as usize] * 4.0 * (hom_r as f64) * (hom_c as f64)
            / (((k + 1) as f64) * ((k + 2) as f64));
        probs[(k + 2) as usize] = next;
        total += next;
        k += 2;
    }

    // ---- Downward from the mode: the inverse trade.
    let mut k = mid;
    while k - 2 >= 0 {
        let hom_r = (rare - k) / 2;
        let hom_c = (common - k) / 2;
        let next = probs[k as usize] * ((k as f64) * ((k - 1) as f64))
            / (4.0 * ((hom_r + 1) as f64) * ((hom_c + 1) as f64));
        probs[(k - 2) as usize] = next;
        total += next;
        k -= 2;
    }

    let p_obs = probs[het as usize] / total;
    let threshold = p_obs * (1.0 + P_TIE_SLACK);
    let mut p_value: f64 = probs
        .iter()
        .map(|p| p / total)
        .filter(|&p| p <= threshold)
        .sum();
    if midp {
        p_value -= 0.5 * p_obs;
    }
    p_value.clamp(0.0, 1.0)
}

/// Statistics derived alongside the exact test.
fn het_stats(counts: &GenoCounts) -> (Option<f64>, Option<f64>) {
    let obs = counts.obs_sample_ct();
    if obs == 0 {
        return (None, None);
    }
    let o_het = f64::from(counts.het) / f64::from(obs);
    let p_ref = f64::from(2 * counts.hom_ref + counts.het) / f64::from(2 * obs);
    let e_het = 2.0 * p_ref * (1.0 - p_ref);
    (Some(o_het), Some(e_het))
}

impl Kernel for HardyKernel {
    type Global = ();
    type Local = ();

    fn name(&self) -> &'static str {
        "hardy"
    }

    fn claim_bounds(&self, ctx: &ScanContext) -> (u32, u32) {
        (ctx.range.start, ctx.range.end)
    }

    fn needs_genotypes(&self, ctx: &ScanContext, projection: &Projection) -> bool {
        projection.intersects(GENO_COLUMNS_FROM..ctx.schema.len())
    }

    fn max_threads(&self, _ctx: &ScanContext) -> u32 {
        u32::MAX
    }

    fn init_global(&self, _ctx: &ScanContext, _projection: &Projection) -> Result<()> {
        Ok(())
    }

    fn init_local(&self, _ctx: &ScanContext, _global: &()) -> Result<()> {
        Ok(())
    }

    fn scan(&self, ctx: &ScanContext, mut args: ScanArgs<'_, Self>, out: &mut OutputBatch) -> Result<()> {
        loop {
            if out.is_full() {
                return Ok(());
            }
            let Some(block) = args.claims.claim(self.claim_batch().min(out.remaining() as u32)) else {
                return Ok(());
            };
            for vidx in block {
                let stats = match args.reader.as_deref_mut() {
                    Some(reader) => {
                        let counts = reader
                            .read_counts(vidx)
                            .with_loc(|| format!("While counting genotypes of variant {vidx}"))?;
                        let (o_het, e_het) = het_stats(&counts);
                        let p = hwe_exact(counts.hom_ref, counts.het, counts.hom_alt, self.midp);
                        Some((counts, o_het, e_het, p))
                    }
                    None => None,
                };
                out.write_row(args.projection, i64::from(vidx), |col| match col {
                    0..=4 => meta_cell(&ctx.cols, vidx, col),
                    5 => stats.as_ref().map_or(Cell::Null, |(c, ..)| Cell::I32(c.hom_ref as i32)),
                    6 => stats.as_ref().map_or(Cell::Null, |(c, ..)| Cell::I32(c.het as i32)),
                    7 => stats.as_ref().map_or(Cell::Null, |(c, ..)| Cell::I32(c.hom_alt as i32)),
                    8 => stats.as_ref().map_or(Cell::Null, |(_, o, ..)| Cell::opt_f64(*o)),
                    9 => stats.as_ref().map_or(Cell::Null, |(_, _, e, _)| Cell::opt_f64(*e)),
                    10 => stats.as_ref().map_or(Cell::Null, |(.., p)| Cell::F64(*p)),
                    other => panic!("unknown Hardy-Weinberg column {other}"),
                });
            }
        }
    }
}

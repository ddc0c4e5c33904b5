//! Linkage-disequilibrium kernel: a single resolved pair, or a sliding
//! window over the variant range with a resumable per-worker cursor.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use located_error::LocatedError;
use log::trace;

use pgen_io::codec::get_nyp;

use crate::bind::bind_context;
use crate::exec::{BoundScan, Kernel, ScanArgs, ScanContext};
use crate::output::{Cell, ColumnDef, LogicalType, OutputBatch, Projection};
use crate::params::{LdOptions, ParamError};

/// Variance floor below which a variant counts as monomorphic.
const VAR_EPSILON: f64 = 1e-15;

/// LD statistics of one variant pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LdStats {
    pub r2: Option<f64>,
    pub d_prime: Option<f64>,
    /// Samples with both calls present.
    pub obs_ct: u32,
}

/// Genotype-level LD estimation over two genovecs.
///
/// Samples missing either call are excluded. Fewer than two shared
/// observations, or a monomorphic side, yield null `r2`/`d_prime`.
pub fn ld_stats(a: &[u64], b: &[u64], sample_ct: usize) -> LdStats {
    let mut n = 0u64;
    let mut sum_a = 0u64;
    let mut sum_b = 0u64;
    let mut sum_ab = 0u64;
    let mut sum_aa = 0u64;
    let mut sum_bb = 0u64;
    for idx in 0..sample_ct {
        let ca = u64::from(get_nyp(a, idx));
        let cb = u64::from(get_nyp(b, idx));
        if ca == 3 || cb == 3 {
            continue;
        }
        n += 1;
        sum_a += ca;
        sum_b += cb;
        sum_ab += ca * cb;
        sum_aa += ca * ca;
        sum_bb += cb * cb;
    }

    let invalid = LdStats{r2: None, d_prime: None, obs_ct: n as u32};
    if n < 2 {
        return invalid;
    }
    let nf = n as f64;
    let mean_a = sum_a as f64 / nf;
    let mean_b = sum_b as f64 / nf;
    let cov = sum_ab as f64 / nf - mean_a * mean_b;
    let var_a = sum_aa as f64 / nf - mean_a * mean_a;
    let var_b = sum_bb as f64 / nf - mean_b * mean_b;
    if var_a < VAR_EPSILON || var_b < VAR_EPSILON {
        return invalid;
    }

    let r2 = (cov * cov) / (var_a * var_b);

    // Haplotype-scale disequilibrium from genotype counts.
    let d = cov / 4.0;
    let p_a = sum_a as f64 / (2.0 * nf);
    let p_b = sum_b as f64 / (2.0 * nf);
    let d_max = if d >= 0.0 {
        (p_a * (1.0 - p_b)).min((1.0 - p_a) * p_b)
    } else {
        (-p_a * p_b).max(-(1.0 - p_a) * (1.0 - p_b))
    };
    let d_prime = if d_max.abs() < VAR_EPSILON { 0.0 } else { d / d_max };

    LdStats{r2: Some(r2), d_prime: Some(d_prime), obs_ct: n as u32}
}

#[derive(Debug, Clone)]
enum LdMode {
    Pair { vidx_a: u32, vidx_b: u32 },
    Windowed { window_bp: u64, r2_threshold: f64, inter_chr: bool },
}

#[derive(Debug)]
pub struct LdKernel {
    mode: LdMode,
}

/// Bind an LD scan over `genotype_path`. `variant1`/`variant2` select the
/// single-pair mode; otherwise the scan slides a window over the range.
pub fn bind(genotype_path: &Path, options: LdOptions) -> Result<Arc<BoundScan<LdKernel>>> {
    if !(0.0..=1.0).contains(&options.r2_threshold) {
        return Err(ParamError::OutOfRangeParameter{
            name: "r2_threshold",
            low: 0.0,
            high: 1.0,
            value: options.r2_threshold,
        })
        .loc("While binding LD scan");
    }
    let mut ctx = bind_context(genotype_path, &options.common, false).loc("While binding LD scan")?;

    let mode = match (&options.variant1, &options.variant2) {
        (Some(id_a), Some(id_b)) => {
            let id_map = ctx.meta.id_map().loc("While indexing variant ids")?;
            let resolve = |id: &str| -> Result<u32> {
                id_map
                    .get(id)
                    .copied()
                    .filter(|vidx| ctx.range.contains(*vidx))
                    .ok_or_else(|| ParamError::UnknownVariantId{id: id.to_string()})
                    .loc("While resolving LD variant ids")
            };
            LdMode::Pair{vidx_a: resolve(id_a)?, vidx_b: resolve(id_b)?}
        }
        (None, None) => LdMode::Windowed{
            window_bp: u64::from(options.window_kb) * 1000,
            r2_threshold: options.r2_threshold,
            inter_chr: options.inter_chr,
        },
        (Some(_), None) => {
            return Err(ParamError::MissingParameter{name: "variant2"}).loc("While binding LD scan")
        }
        (None, Some(_)) => {
            return Err(ParamError::MissingParameter{name: "variant1"}).loc("While binding LD scan")
        }
    };

    ctx.schema = vec![
        ColumnDef{name: "chrom_a", ty: LogicalType::Utf8},
        ColumnDef{name: "pos_a", ty: LogicalType::Int32},
        ColumnDef{name: "id_a", ty: LogicalType::Utf8},
        ColumnDef{name: "chrom_b", ty: LogicalType::Utf8},
        ColumnDef{name: "pos_b", ty: LogicalType::Int32},
        ColumnDef{name: "id_b", ty: LogicalType::Utf8},
        ColumnDef{name: "r2", ty: LogicalType::Float64},
        ColumnDef{name: "d_prime", ty: LogicalType::Float64},
        ColumnDef{name: "obs_ct", ty: LogicalType::Int32},
    ];
    Ok(Arc::new(BoundScan{ctx, kernel: LdKernel{mode}}))
}

/// Windowed-scan worker cursor, preserved across `scan` calls so an anchor's
/// genovec is read exactly once however often the output fills up.
pub struct LdLocal {
    anchor: u32,
    next_partner: u32,
    in_window: bool,
    anchor_genovec: Vec<u64>,
    partner_genovec: Vec<u64>,
}

impl LdKernel {
    fn emit_pair(
        ctx: &ScanContext,
        projection: &Projection,
        out: &mut OutputBatch,
        vidx_a: u32,
        vidx_b: u32,
        stats: LdStats,
    ) {
        out.write_row(projection, i64::from(vidx_a), |col| match col {
            0..=2 => super::meta_cell(&ctx.cols, vidx_a, ld_meta_col(col)),
            3..=5 => super::meta_cell(&ctx.cols, vidx_b, ld_meta_col(col)),
            6 => Cell::opt_f64(stats.r2),
            7 => Cell::opt_f64(stats.d_prime),
            8 => Cell::I32(stats.obs_ct as i32),
            other => panic!("unknown LD column {other}"),
        });
    }

    fn scan_windowed(
        &self,
        ctx: &ScanContext,
        args: &mut ScanArgs<'_, Self>,
        out: &mut OutputBatch,
        window_bp: u64,
        r2_threshold: f64,
        inter_chr: bool,
    ) -> Result<()> {
        let sample_ct = ctx.effective_sample_ct() as usize;
        let local = &mut *args.local;
        let Some(reader) = args.reader.as_deref_mut() else {
            return Ok(());
        };
        loop {
            if out.is_full() {
                return Ok(()); // Cursor state rides along in `local`.
            }
            if !local.in_window {
                let Some(block) = args.claims.claim(1) else {
                    return Ok(());
                };
                local.anchor = block.start;
                local.next_partner = local.anchor + 1;
                local.in_window = true;
                reader
                    .read(local.anchor, &mut local.anchor_genovec)
                    .with_loc(|| format!("While reading LD anchor variant {}", local.anchor))?;
                trace!("ld: anchor {}", local.anchor);
            }

            let anchor = local.anchor as usize;
            let anchor_chrom = &ctx.cols.chroms[anchor];
            let anchor_pos = u64::from(ctx.cols.positions[anchor]);
            while local.next_partner < ctx.range.end {
                if out.is_full() {
                    return Ok(());
                }
                let partner = local.next_partner;
                let same_chrom = &ctx.cols.chroms[partner as usize] == anchor_chrom;
                if same_chrom {
                    let dist = u64::from(ctx.cols.positions[partner as usize]).saturating_sub(anchor_pos);
                    if dist > window_bp {
                        if !inter_chr {
                            break;
                        }
                        // Window exhausted on this chromosome; jump to the
                        // next chrom block and keep pairing across it.
                        local.next_partner = skip_chrom_block(ctx, partner);
                        continue;
                    }
                } else if !inter_chr {
                    break;
                }

                reader
                    .read(partner, &mut local.partner_genovec)
                    .with_loc(|| format!("While reading LD partner variant {partner}"))?;
                let stats = ld_stats(&local.anchor_genovec, &local.partner_genovec, sample_ct);
                if let Some(r2) = stats.r2 {
                    if r2 >= r2_threshold {
                        Self::emit_pair(ctx, args.projection, out, local.anchor, partner, stats);
                    }
                }
                local.next_partner += 1;
            }
            local.in_window = false;
        }
    }
}

/// Metadata column behind each of the six leading LD schema columns.
fn ld_meta_col(col: usize) -> usize {
    match col % 3 {
        0 => 0, // chrom
        1 => 1, // pos
        _ => 2, // id
    }
}

/// First vidx past `vidx`'s chromosome block (within the bound range).
fn skip_chrom_block(ctx: &ScanContext, vidx: u32) -> u32 {
    let chrom = &ctx.cols.chroms[vidx as usize];
    let mut next = vidx + 1;
    while next < ctx.range.end && &ctx.cols.chroms[next as usize] == chrom {
        next += 1;
    }
    next
}

impl Kernel for LdKernel {
    type Global = ();
    type Local = LdLocal;

    fn name(&self) -> &'static str {
        "ld"
    }

    fn claim_bounds(&self, ctx: &ScanContext) -> (u32, u32) {
        match self.mode {
            // The pair is a single claim unit.
            LdMode::Pair{..} => (0, 1),
            LdMode::Windowed{..} => (ctx.range.start, ctx.range.end),
        }
    }

    fn claim_batch(&self) -> u32 {
        1 // Anchors are claimed one at a time.
    }

    fn needs_genotypes(&self, _ctx: &ScanContext, _projection: &Projection) -> bool {
        // Which pairs are emitted at all depends on r2, so the reader is
        // required whatever the projection.
        true
    }

    fn max_threads(&self, _ctx: &ScanContext) -> u32 {
        match self.mode {
            LdMode::Pair{..} => 1,
            LdMode::Windowed{..} => u32::MAX,
        }
    }

    fn init_global(&self, _ctx: &ScanContext, _projection: &Projection) -> Result<()> {
        Ok(())
    }

    fn init_local(&self, ctx: &ScanContext, _global: &()) -> Result<LdLocal> {
        let words = pgen_io::mem::nyp_to_aligned_word_ct(ctx.effective_sample_ct() as usize);
        Ok(LdLocal{
            anchor: 0,
            next_partner: 0,
            in_window: false,
            anchor_genovec: vec![0u64; words],
            partner_genovec: vec![0u64; words],
        })
    }

    fn scan(&self, ctx: &ScanContext, mut args: ScanArgs<'_, Self>, out: &mut OutputBatch) -> Result<()> {
        match self.mode {
            LdMode::Pair{vidx_a, vidx_b} => {
                if out.is_full() || args.claims.claim(1).is_none() {
                    return Ok(());
                }
                let local = &mut *args.local;
                let Some(reader) = args.reader.as_deref_mut() else {
                    return Ok(());
                };
                reader
                    .read(vidx_a, &mut local.anchor_genovec)
                    .with_loc(|| format!("While reading LD variant {vidx_a}"))?;
                reader
                    .read(vidx_b, &mut local.partner_genovec)
                    .with_loc(|| format!("While reading LD variant {vidx_b}"))?;
                let stats = ld_stats(
                    &local.anchor_genovec,
                    &local.partner_genovec,
                    ctx.effective_sample_ct() as usize,
                );
                Self::emit_pair(ctx, args.projection, out, vidx_a, vidx_b, stats);
                Ok(())
            }
            LdMode::Windowed{window_bp, r2_threshold, inter_chr} => {
                self.scan_windowed(ctx, &mut args, out, window_bp, r2_threshold, inter_chr)
            }
        }
    }
}

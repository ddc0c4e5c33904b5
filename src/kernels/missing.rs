//! Missingness kernel, in two orientations: per-variant missing counts
//! (parallel), and per-sample missing counts (a serialized accumulation
//! pass followed by parallel row emission).

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use located_error::LocatedError;
use log::debug;
use parking_lot::Mutex;

use pgen_io::mem::{popcount, SetBitIter};

use crate::bind::bind_context;
use crate::exec::{BoundScan, Kernel, ScanArgs, ScanContext};
use crate::kernels::meta_cell;
use crate::output::{Cell, ColumnDef, LogicalType, OutputBatch, Projection};
use crate::params::{MissingMode, MissingOptions};

/// First genotype-dependent column: `missing_ct`, behind the three
/// metadata columns in variant mode and behind `{fid, iid}` in sample mode.
const VARIANT_GENO_COLUMNS_FROM: usize = 3;
const SAMPLE_GENO_COLUMNS_FROM: usize = 2;

pub struct MissingKernel {
    mode: MissingMode,
}

/// Bind a missingness scan over `genotype_path`.
pub fn bind(genotype_path: &Path, options: MissingOptions) -> Result<Arc<BoundScan<MissingKernel>>> {
    let require_samples = options.mode == MissingMode::Sample;
    let mut ctx = bind_context(genotype_path, &options.common, require_samples)
        .loc("While binding missingness scan")?;
    ctx.schema = match options.mode {
        MissingMode::Variant => vec![
            ColumnDef{name: "chrom", ty: LogicalType::Utf8},
            ColumnDef{name: "pos", ty: LogicalType::Int32},
            ColumnDef{name: "id", ty: LogicalType::Utf8},
            ColumnDef{name: "missing_ct", ty: LogicalType::Int32},
            ColumnDef{name: "obs_ct", ty: LogicalType::Int32},
            ColumnDef{name: "f_miss", ty: LogicalType::Float64},
        ],
        MissingMode::Sample => vec![
            ColumnDef{name: "fid", ty: LogicalType::Utf8},
            ColumnDef{name: "iid", ty: LogicalType::Utf8},
            ColumnDef{name: "missing_ct", ty: LogicalType::Int32},
            ColumnDef{name: "obs_ct", ty: LogicalType::Int32},
            ColumnDef{name: "f_miss", ty: LogicalType::Float64},
        ],
    };
    Ok(Arc::new(BoundScan{ctx, kernel: MissingKernel{mode: options.mode}}))
}

/// Sample-mode shared state: the accumulation pass runs once, guarded by a
/// one-shot flag plus a lock; workers then only read the published counts.
pub struct MissingGlobal {
    accumulated: AtomicBool,
    counts: Mutex<Option<Arc<Vec<u32>>>>,
}

pub struct MissingLocal {
    /// Missingness bitmask scratch (variant mode and the accumulation pass).
    mask: Vec<u64>,
    /// Published per-sample counts, cloned out once on first use.
    counts: Option<Arc<Vec<u32>>>,
}

impl MissingKernel {
    /// Accumulate per-sample missing counts over the whole variant range.
    ///
    /// One-shot: whichever worker takes the lock first runs the pass; the
    /// done flag keeps late arrivals from contending for the compute path,
    /// and every worker caches the published counts locally.
    fn accumulate(
        &self,
        ctx: &ScanContext,
        global: &MissingGlobal,
        reader: &mut pgen_io::PgenReader,
        local: &mut MissingLocal,
    ) -> Result<Arc<Vec<u32>>> {
        if let Some(existing) = &local.counts {
            return Ok(Arc::clone(existing));
        }
        let effective = ctx.effective_sample_ct() as usize;
        if !global.accumulated.load(Ordering::Acquire) {
            let mut guard = global.counts.lock();
            if guard.is_none() {
                debug!("missing: accumulating per-sample counts over {} variants", ctx.range.len());
                let mut counts = vec![0u32; effective];
                for vidx in ctx.range.start..ctx.range.end {
                    reader
                        .read_missingness(vidx, &mut local.mask)
                        .with_loc(|| format!("While reading missingness of variant {vidx}"))?;
                    for slot in SetBitIter::new(&local.mask) {
                        if slot < effective {
                            counts[slot] += 1;
                        }
                    }
                }
                *guard = Some(Arc::new(counts));
                global.accumulated.store(true, Ordering::Release);
            }
        }
        let published = Arc::clone(
            global.counts.lock().as_ref().expect("counts published under the one-shot flag"),
        );
        local.counts = Some(Arc::clone(&published));
        Ok(published)
    }

    fn scan_variants(
        &self,
        ctx: &ScanContext,
        args: &mut ScanArgs<'_, Self>,
        out: &mut OutputBatch,
    ) -> Result<()> {
        let effective = ctx.effective_sample_ct();
        loop {
            if out.is_full() {
                return Ok(());
            }
            let Some(block) = args.claims.claim(self.claim_batch().min(out.remaining() as u32)) else {
                return Ok(());
            };
            for vidx in block {
                let missing_ct = match args.reader.as_deref_mut() {
                    Some(reader) => {
                        reader
                            .read_missingness(vidx, &mut args.local.mask)
                            .with_loc(|| format!("While reading missingness of variant {vidx}"))?;
                        Some(popcount(&args.local.mask))
                    }
                    None => None,
                };
                out.write_row(args.projection, i64::from(vidx), |col| match col {
                    0..=2 => meta_cell(&ctx.cols, vidx, col),
                    3 => missing_ct.map_or(Cell::Null, |m| Cell::I32(m as i32)),
                    4 => missing_ct.map_or(Cell::Null, |m| Cell::I32((effective - m) as i32)),
                    5 => missing_ct.map_or(Cell::Null, |m| {
                        if effective == 0 {
                            Cell::F64(0.0)
                        } else {
                            Cell::F64(f64::from(m) / f64::from(effective))
                        }
                    }),
                    other => panic!("unknown missingness column {other}"),
                });
            }
        }
    }

    fn scan_samples(
        &self,
        ctx: &ScanContext,
        args: &mut ScanArgs<'_, Self>,
        out: &mut OutputBatch,
    ) -> Result<()> {
        let counts = match args.reader.as_deref_mut() {
            Some(reader) => Some(self.accumulate(ctx, args.global, reader, args.local)?),
            None => None,
        };
        let samples = ctx
            .samples
            .as_deref()
            .expect("sample-mode missingness binds with a sample sidecar");
        let total = ctx.range.len();

        loop {
            if out.is_full() {
                return Ok(());
            }
            let Some(block) = args.claims.claim(self.claim_batch().min(out.remaining() as u32)) else {
                return Ok(());
            };
            for slot in block {
                let record = samples.get(ctx.raw_sample_idx(slot));
                let missing_ct = counts.as_ref().map(|c| c[slot as usize]);
                out.write_row(args.projection, i64::from(slot), |col| match col {
                    0 => Cell::opt_str(record.fid.as_deref()),
                    1 => Cell::Str(&record.iid),
                    2 => missing_ct.map_or(Cell::Null, |m| Cell::I32(m as i32)),
                    3 => missing_ct.map_or(Cell::Null, |m| Cell::I32((total - m) as i32)),
                    4 => missing_ct.map_or(Cell::Null, |m| {
                        if total == 0 {
                            Cell::F64(0.0)
                        } else {
                            Cell::F64(f64::from(m) / f64::from(total))
                        }
                    }),
                    other => panic!("unknown missingness column {other}"),
                });
            }
        }
    }
}

impl Kernel for MissingKernel {
    type Global = MissingGlobal;
    type Local = MissingLocal;

    fn name(&self) -> &'static str {
        "missing"
    }

    fn claim_bounds(&self, ctx: &ScanContext) -> (u32, u32) {
        match self.mode {
            MissingMode::Variant => (ctx.range.start, ctx.range.end),
            MissingMode::Sample => (0, ctx.effective_sample_ct()),
        }
    }

    fn needs_genotypes(&self, ctx: &ScanContext, projection: &Projection) -> bool {
        let from = match self.mode {
            MissingMode::Variant => VARIANT_GENO_COLUMNS_FROM,
            MissingMode::Sample => SAMPLE_GENO_COLUMNS_FROM,
        };
        projection.intersects(from..ctx.schema.len())
    }

    fn max_threads(&self, _ctx: &ScanContext) -> u32 {
        match self.mode {
            MissingMode::Variant => u32::MAX,
            MissingMode::Sample => 1,
        }
    }

    fn init_global(&self, _ctx: &ScanContext, _projection: &Projection) -> Result<MissingGlobal> {
        Ok(MissingGlobal{accumulated: AtomicBool::new(false), counts: Mutex::new(None)})
    }

    fn init_local(&self, ctx: &ScanContext, _global: &MissingGlobal) -> Result<MissingLocal> {
        let words = pgen_io::mem::bits_to_aligned_word_ct(ctx.effective_sample_ct() as usize);
        Ok(MissingLocal{mask: vec![0u64; words], counts: None})
    }

    fn scan(&self, ctx: &ScanContext, mut args: ScanArgs<'_, Self>, out: &mut OutputBatch) -> Result<()> {
        match self.mode {
            MissingMode::Variant => self.scan_variants(ctx, &mut args, out),
            MissingMode::Sample => self.scan_samples(ctx, &mut args, out),
        }
    }
}

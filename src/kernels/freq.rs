//! Allele-frequency kernel: per-variant ALT frequency and observation
//! counts straight off the fast-count path.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use located_error::LocatedError;
use pgen_io::GenoCounts;

use crate::bind::bind_context;
use crate::exec::{BoundScan, Kernel, ScanArgs, ScanContext};
use crate::kernels::meta_cell;
use crate::output::{Cell, ColumnDef, LogicalType, OutputBatch, Projection};
use crate::params::{FreqOptions, ParamError};

/// First genotype-dependent column: `alt_freq`.
const GENO_COLUMNS_FROM: usize = 5;

#[derive(Debug)]
pub struct FreqKernel;

/// Bind an allele-frequency scan over `genotype_path`.
///
/// # Errors
/// Everything [`bind_context`] raises, plus `DosageNotImplemented` when the
/// reserved `dosage` flag is set.
pub fn bind(genotype_path: &Path, options: FreqOptions) -> Result<Arc<BoundScan<FreqKernel>>> {
    if options.dosage {
        return Err(ParamError::DosageNotImplemented).loc("While binding frequency scan");
    }
    let mut ctx = bind_context(genotype_path, &options.common, false)
        .loc("While binding frequency scan")?;
    ctx.schema = vec![
        ColumnDef{name: "chrom", ty: LogicalType::Utf8},
        ColumnDef{name: "pos", ty: LogicalType::Int32},
        ColumnDef{name: "id", ty: LogicalType::Utf8},
        ColumnDef{name: "ref", ty: LogicalType::Utf8},
        ColumnDef{name: "alt", ty: LogicalType::Utf8},
        ColumnDef{name: "alt_freq", ty: LogicalType::Float64},
        ColumnDef{name: "obs_ct", ty: LogicalType::Int32},
    ];
    if options.counts {
        ctx.schema.extend([
            ColumnDef{name: "hom_ref_ct", ty: LogicalType::Int32},
            ColumnDef{name: "het_ct", ty: LogicalType::Int32},
            ColumnDef{name: "hom_alt_ct", ty: LogicalType::Int32},
            ColumnDef{name: "missing_ct", ty: LogicalType::Int32},
        ]);
    }
    Ok(Arc::new(BoundScan{ctx, kernel: FreqKernel}))
}

impl Kernel for FreqKernel {
    type Global = ();
    type Local = ();

    fn name(&self) -> &'static str {
        "freq"
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
                let counts: Option<GenoCounts> = match args.reader.as_deref_mut() {
                    Some(reader) => Some(
                        reader
                            .read_counts(vidx)
                            .with_loc(|| format!("While counting genotypes of variant {vidx}"))?,
                    ),
                    None => None,
                };
                out.write_row(args.projection, i64::from(vidx), |col| match col {
                    0..=4 => meta_cell(&ctx.cols, vidx, col),
                    5 => Cell::opt_f64(counts.and_then(|c| c.alt_freq())),
                    6 => counts.map_or(Cell::Null, |c| Cell::I32(c.obs_allele_ct() as i32)),
                    7 => counts.map_or(Cell::Null, |c| Cell::I32(c.hom_ref as i32)),
                    8 => counts.map_or(Cell::Null, |c| Cell::I32(c.het as i32)),
                    9 => counts.map_or(Cell::Null, |c| Cell::I32(c.hom_alt as i32)),
                    10 => counts.map_or(Cell::Null, |c| Cell::I32(c.missing as i32)),
                    other => panic!("unknown frequency column {other}"),
                });
            }
        }
    }
}

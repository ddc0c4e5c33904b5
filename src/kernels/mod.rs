//! The five scan kernels. Each module exposes a `bind` entry point
//! returning an [`Arc<BoundScan>`](crate::exec::BoundScan) over its kernel
//! type; the shared driver in [`crate::exec`] handles everything else.

pub mod freq;
pub mod hardy;
pub mod ld;
pub mod missing;
pub mod score;

use sidecar::MetaColumns;

use crate::output::Cell;

/// Variant metadata cell for the leading `{chrom, pos, id, ref, alt}`
/// column block shared by the variant-oriented schemas.
pub(crate) fn meta_cell(cols: &MetaColumns, vidx: u32, col: usize) -> Cell<'_> {
    let v = vidx as usize;
    match col {
        0 => Cell::Str(&cols.chroms[v]),
        1 => Cell::I32(cols.positions[v] as i32),
        2 => Cell::opt_str(cols.ids[v].as_deref()),
        3 => Cell::Str(&cols.refs[v]),
        4 => Cell::opt_str(cols.alts[v].as_deref()),
        other => panic!("column {other} is not a variant metadata column"),
    }
}

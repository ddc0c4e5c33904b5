//! Generic scan driver shared by the five kernels: projection capture,
//! atomic variant-batch claiming, per-thread reader lifecycle, cooperative
//! cancellation, and a thread-pool runner for hosts that just want all rows.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use located_error::LocatedError;
use log::{debug, trace};
use parking_lot::Mutex;

use pgen_io::{PgenHeader, PgenReader, SampleSubset};
use sidecar::{MetaColumns, SampleMeta, VariantMeta, VariantRange};

use crate::output::{OutputBatch, Projection, Schema, DEFAULT_BATCH_CAPACITY};

/// Hard ceiling of the worker-count heuristic.
const MAX_THREADS: u32 = 16;

/// Claim units one heuristic thread should have to itself.
const UNITS_PER_THREAD: u32 = 500;

/// Bind products shared by every kernel: immutable after bind, borrowed by
/// all workers.
#[derive(Debug)]
pub struct ScanContext {
    pub header: Arc<PgenHeader>,
    pub meta: Arc<VariantMeta>,
    /// Eager metadata columns for per-row emission.
    pub cols: Arc<MetaColumns>,
    pub samples: Option<Arc<SampleMeta>>,
    pub subset: Option<Arc<SampleSubset>>,
    pub range: VariantRange,
    pub schema: Schema,
}

impl ScanContext {
    /// Samples every decoded buffer covers.
    pub fn effective_sample_ct(&self) -> u32 {
        pgen_io::effective_sample_ct(self.subset.as_deref(), self.header.raw_sample_ct())
    }

    /// Raw sample index behind an effective-sample slot.
    pub fn raw_sample_idx(&self, slot: u32) -> u32 {
        pgen_io::raw_sample_idx(self.subset.as_deref(), slot)
    }
}

/// Per-kernel scan behavior plugged into the shared driver.
pub trait Kernel: Send + Sync + Sized + 'static {
    /// Kernel state shared across workers (atomics, mutex-guarded phases).
    type Global: Send + Sync;
    /// Per-worker state beyond the common reader (scratch, cursors).
    type Local: Send;

    fn name(&self) -> &'static str;

    /// Claim-counter space: variant ranges for variant-oriented kernels,
    /// `[0, effective_sample_ct)` for sample-oriented ones.
    fn claim_bounds(&self, ctx: &ScanContext) -> (u32, u32);

    /// Claim units handed to a worker per cursor bump.
    fn claim_batch(&self) -> u32 {
        128
    }

    /// Whether the projection forces genotype reads; a `false` here means no
    /// reader is ever constructed for any thread.
    fn needs_genotypes(&self, ctx: &ScanContext, projection: &Projection) -> bool;

    /// Worker-count cap beyond the shared heuristic.
    fn max_threads(&self, ctx: &ScanContext) -> u32;

    fn init_global(&self, ctx: &ScanContext, projection: &Projection) -> Result<Self::Global>;

    fn init_local(&self, ctx: &ScanContext, global: &Self::Global) -> Result<Self::Local>;

    /// Fill `out` until it is full or the claim space is exhausted. Called
    /// repeatedly; resumable kernel state belongs in `Self::Local`.
    fn scan(
        &self,
        ctx: &ScanContext,
        args: ScanArgs<'_, Self>,
        out: &mut OutputBatch,
    ) -> Result<()>;
}

/// Everything a `scan` call may touch besides the context and the batch.
pub struct ScanArgs<'a, K: Kernel> {
    pub projection: &'a Projection,
    pub claims: &'a ClaimCursor,
    pub global: &'a K::Global,
    pub reader: Option<&'a mut PgenReader>,
    pub local: &'a mut K::Local,
}

/// Shared claim counter with a cancellation flag; both checked only at
/// claim boundaries, so claimed work always runs to completion.
#[derive(Debug)]
pub struct ClaimCursor {
    next: AtomicU64,
    end: u32,
    cancelled: AtomicBool,
}

impl ClaimCursor {
    fn new(start: u32, end: u32) -> Self {
        Self{next: AtomicU64::new(u64::from(start)), end, cancelled: AtomicBool::new(false)}
    }

    /// Claim up to `batch` contiguous units; `None` once exhausted or
    /// cancelled.
    pub fn claim(&self, batch: u32) -> Option<Range<u32>> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        let start = self.next.fetch_add(u64::from(batch), Ordering::Relaxed);
        if start >= u64::from(self.end) {
            return None;
        }
        let start = start as u32;
        let end = start.saturating_add(batch).min(self.end);
        trace!("claimed [{start}, {end})");
        Some(start..end)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A bound query: context plus the kernel's own bound state. Immutable;
/// init-global may be called once per execution.
#[derive(Debug)]
pub struct BoundScan<K: Kernel> {
    pub(crate) ctx: ScanContext,
    pub(crate) kernel: K,
}

impl<K: Kernel> BoundScan<K> {
    pub fn schema(&self) -> &Schema {
        &self.ctx.schema
    }

    pub fn context(&self) -> &ScanContext {
        &self.ctx
    }

    /// Capture the projection and build the execution-wide state.
    pub fn init_global(self: Arc<Self>, projection: Projection) -> Result<ScanGlobal<K>> {
        let (start, end) = self.kernel.claim_bounds(&self.ctx);
        let need_genotypes = self.kernel.needs_genotypes(&self.ctx, &projection);
        let kernel_global = self.kernel.init_global(&self.ctx, &projection)?;
        debug!(
            "{}: claim space [{start}, {end}), need_genotypes: {need_genotypes}",
            self.kernel.name()
        );
        Ok(ScanGlobal{
            bound: self,
            projection,
            need_genotypes,
            claims: ClaimCursor::new(start, end),
            kernel_global,
        })
    }
}

/// Execution-wide scan state, shared by reference across workers.
pub struct ScanGlobal<K: Kernel> {
    bound: Arc<BoundScan<K>>,
    projection: Projection,
    need_genotypes: bool,
    claims: ClaimCursor,
    kernel_global: K::Global,
}

/// One worker's private scan state.
pub struct ScanLocal<K: Kernel> {
    reader: Option<PgenReader>,
    local: K::Local,
}

impl<K: Kernel> ScanGlobal<K> {
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Worker count the host should start: the shared heuristic bounded by
    /// the kernel's own cap.
    pub fn max_threads(&self) -> u32 {
        let ctx = &self.bound.ctx;
        let (start, end) = self.bound.kernel.claim_bounds(ctx);
        let units = end.saturating_sub(start);
        let heuristic = (units / UNITS_PER_THREAD + 1).min(MAX_THREADS);
        heuristic.min(self.bound.kernel.max_threads(ctx)).max(1)
    }

    /// Request cooperative cancellation; observed at the next claim.
    pub fn cancel(&self) {
        self.claims.cancel();
    }

    /// Allocate a batch matching the captured projection.
    pub fn make_batch(&self, capacity: usize) -> OutputBatch {
        OutputBatch::new(&self.bound.ctx.schema, &self.projection, capacity)
    }

    /// Build one worker's local state; a decoder reader is only constructed
    /// when some projected column needs it.
    pub fn init_local(&self) -> Result<ScanLocal<K>> {
        let ctx = &self.bound.ctx;
        let reader = if self.need_genotypes {
            Some(
                PgenReader::new(Arc::clone(&ctx.header), ctx.subset.clone())
                    .loc("While constructing a worker's genotype reader")?,
            )
        } else {
            None
        };
        let local = self.bound.kernel.init_local(ctx, &self.kernel_global)?;
        Ok(ScanLocal{reader, local})
    }

    /// Run one scan step for a worker: fills `out` until full or exhausted.
    /// An untouched batch (`out.is_empty()` on return) signals exhaustion.
    pub fn scan(&self, local: &mut ScanLocal<K>, out: &mut OutputBatch) -> Result<()> {
        self.bound.kernel.scan(
            &self.bound.ctx,
            ScanArgs{
                projection: &self.projection,
                claims: &self.claims,
                global: &self.kernel_global,
                reader: local.reader.as_mut(),
                local: &mut local.local,
            },
            out,
        )
    }
}

/// Drive a bound query to completion on a scoped thread pool and hand back
/// every produced batch. Batch order across workers is unspecified.
pub fn run_to_completion<K: Kernel>(
    bound: Arc<BoundScan<K>>,
    projection: Projection,
) -> Result<Vec<OutputBatch>> {
    let global = Arc::clone(&bound).init_global(projection)?;
    let threads = global.max_threads();
    debug!("{}: running on {threads} worker(s)", bound.kernel.name());

    let batches: Mutex<Vec<OutputBatch>> = Mutex::new(Vec::new());
    let failure: Mutex<Option<anyhow::Error>> = Mutex::new(None);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads as usize)
        .build()
        .loc("While building the scan thread pool")?;
    pool.scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|_| {
                let run = || -> Result<Vec<OutputBatch>> {
                    let mut produced = Vec::new();
                    let mut local = global.init_local()?;
                    loop {
                        let mut out = global.make_batch(DEFAULT_BATCH_CAPACITY);
                        global.scan(&mut local, &mut out)?;
                        if out.is_empty() {
                            break;
                        }
                        produced.push(out);
                    }
                    Ok(produced)
                };
                match run() {
                    Ok(produced) => batches.lock().extend(produced),
                    Err(err) => {
                        // First failure wins; siblings stop at their next claim.
                        global.cancel();
                        failure.lock().get_or_insert(err);
                    }
                }
            });
        }
    });

    if let Some(err) = failure.into_inner() {
        return Err(err);
    }
    Ok(batches.into_inner())
}

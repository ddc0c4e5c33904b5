use crate::codec;
use crate::error::PgenError;
use crate::mem::{self, AlignedWords};

/// Immutable sample-subset descriptor, built once per query and shared by
/// reference across every worker thread.
///
/// Three derived forms are kept because distinct reader entry points demand
/// them: the dense-read gather walks `include`, the fast-count path consumes
/// `interleaved`, and missingness compaction answers rank queries from
/// `cumulative_popcounts`.
#[derive(Debug)]
pub struct SampleSubset {
    raw_sample_ct: u32,
    subset_sample_ct: u32,
    /// Sorted original sample indices, ascending. This is also the emission
    /// order of every sample-oriented kernel.
    indices: Vec<u32>,
    /// One bit per raw sample, padded to an aligned vector multiple.
    include: AlignedWords,
    /// `include` expanded to the low bit of each 2-bit genovec lane.
    interleaved: AlignedWords,
    /// Per `include`-word popcount of all earlier words.
    cumulative_popcounts: Vec<u32>,
}

impl SampleSubset {
    /// Build the descriptor from raw sample indices.
    ///
    /// Indices are sorted ascending here: the contracted genovec the reader
    /// hands out follows ascending raw order, whatever order the caller
    /// supplied.
    ///
    /// # Errors
    /// - `SampleOutOfRange` for any index `>= raw_sample_ct`.
    /// - `UnsortedSubset` if a duplicate survives sorting (callers are
    ///   expected to have rejected duplicates beforehand).
    pub fn build(raw_sample_ct: u32, mut indices: Vec<u32>) -> Result<Self, PgenError> {
        indices.sort_unstable();
        let word_ct = mem::bits_to_aligned_word_ct(raw_sample_ct as usize);
        let mut include = AlignedWords::zeroed(word_ct)?;
        let mut interleaved = AlignedWords::zeroed(mem::nyp_to_aligned_word_ct(raw_sample_ct as usize))?;
        let mut prev: Option<u32> = None;
        for &idx in &indices {
            if idx >= raw_sample_ct {
                return Err(PgenError::SampleOutOfRange{idx, raw_sample_ct});
            }
            if prev == Some(idx) {
                return Err(PgenError::UnsortedSubset{prev: idx, idx});
            }
            prev = Some(idx);
            mem::set_bit(&mut include, idx as usize);
            let lane = idx as usize;
            interleaved[lane / mem::NYPS_PER_WORD] |= 1u64 << ((lane % mem::NYPS_PER_WORD) * 2);
        }

        let mut cumulative_popcounts = Vec::with_capacity(include.len());
        let mut running = 0u32;
        for &word in include.iter() {
            cumulative_popcounts.push(running);
            running += word.count_ones();
        }

        let subset_sample_ct = indices.len() as u32;
        Ok(Self{raw_sample_ct, subset_sample_ct, indices, include, interleaved, cumulative_popcounts})
    }

    #[inline]
    pub fn raw_sample_ct(&self) -> u32 {
        self.raw_sample_ct
    }

    #[inline]
    pub fn subset_sample_ct(&self) -> u32 {
        self.subset_sample_ct
    }

    /// Sorted raw indices; slot `k` of any contracted buffer maps back to
    /// `indices()[k]`.
    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    #[inline]
    pub fn include(&self) -> &[u64] {
        self.include.as_slice()
    }

    #[inline]
    pub fn interleaved(&self) -> &[u64] {
        self.interleaved.as_slice()
    }

    #[inline]
    pub fn cumulative_popcounts(&self) -> &[u32] {
        &self.cumulative_popcounts
    }

    /// Subset slot of raw sample `raw_idx`, or `None` when excluded.
    pub fn subset_slot(&self, raw_idx: u32) -> Option<u32> {
        if !mem::is_bit_set(self.include(), raw_idx as usize) {
            return None;
        }
        Some(mem::rank(self.include(), &self.cumulative_popcounts, raw_idx as usize))
    }

    /// Whether raw sample `raw_idx` is part of the subset.
    #[inline]
    pub fn contains(&self, raw_idx: u32) -> bool {
        mem::is_bit_set(self.include(), raw_idx as usize)
    }
}

/// Effective sample count of an optional subset over `raw_sample_ct` samples.
#[inline]
pub fn effective_sample_ct(subset: Option<&SampleSubset>, raw_sample_ct: u32) -> u32 {
    subset.map_or(raw_sample_ct, SampleSubset::subset_sample_ct)
}

/// Map an effective-sample slot back to its raw sample index.
#[inline]
pub fn raw_sample_idx(subset: Option<&SampleSubset>, slot: u32) -> u32 {
    subset.map_or(slot, |s| s.indices()[slot as usize])
}

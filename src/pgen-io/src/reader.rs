use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use log::debug;

use crate::codec::{self, GenoCounts, DOSAGE_MISSING};
use crate::error::PgenError;
use crate::header::{PgenHeader, StorageMode};
use crate::mem::{self, AlignedWords};
use crate::subset::SampleSubset;

/// Dosage decode target, reused across variants by the scoring path.
#[derive(Debug)]
pub struct DosageBuf {
    /// One bit per effective sample with a usable (non-missing) dosage.
    pub present: Vec<u64>,
    /// Usable dosages only, packed in ascending effective-sample order.
    pub dense: Vec<f64>,
    /// One entry per effective sample; missing entries hold the sentinel.
    pub doubles: Vec<f64>,
    pub present_ct: u32,
}

impl DosageBuf {
    pub fn for_samples(effective_sample_ct: u32) -> Self {
        let n = effective_sample_ct as usize;
        Self{
            present: vec![0u64; mem::bits_to_word_ct(n)],
            dense: Vec::with_capacity(n),
            doubles: vec![DOSAGE_MISSING; n],
            present_ct: 0,
        }
    }

    fn reset(&mut self) {
        self.present.fill(0);
        self.dense.clear();
        self.doubles.fill(DOSAGE_MISSING);
        self.present_ct = 0;
    }
}

/// Per-thread PGEN record reader.
///
/// Each reader owns an independent file handle plus its aligned working
/// buffers, so concurrent readers never share mutable state. The header
/// context is held through an `Arc` and therefore cannot be torn down before
/// any reader constructed from it.
#[derive(Debug)]
pub struct PgenReader {
    header: Arc<PgenHeader>,
    subset: Option<Arc<SampleSubset>>,
    file: File,
    /// Record landing buffer, `reader_workspace_bytes` wide.
    record_buf: AlignedWords,
    /// Raw-sample-space genovec scratch.
    raw_genovec: AlignedWords,
    /// Raw-sample-space missingness scratch.
    raw_mask: AlignedWords,
    /// Interleaved all-samples mask, consumed when no subset is bound.
    full_mask: AlignedWords,
}

impl PgenReader {
    /// Open a reader over `header`, optionally bound to a sample subset.
    ///
    /// # Errors
    /// `SubsetMismatch` when the subset was built over a different raw
    /// sample count; `Open`/`Alloc` on handle or buffer failures.
    pub fn new(
        header: Arc<PgenHeader>,
        subset: Option<Arc<SampleSubset>>,
    ) -> Result<Self, PgenError> {
        if let Some(s) = &subset {
            if s.raw_sample_ct() != header.raw_sample_ct() {
                return Err(PgenError::SubsetMismatch{
                    subset: s.raw_sample_ct(),
                    raw: header.raw_sample_ct(),
                });
            }
        }
        let path = header.path();
        let file = File::open(path)
            .map_err(|source| PgenError::Open{path: path.to_path_buf(), source})?;

        let raw_ct = header.raw_sample_ct() as usize;
        let record_buf = AlignedWords::zeroed(header.reader_workspace_bytes() / 8)?;
        let raw_genovec = AlignedWords::zeroed(mem::nyp_to_aligned_word_ct(raw_ct))?;
        let raw_mask = AlignedWords::zeroed(mem::bits_to_aligned_word_ct(raw_ct))?;
        let mut full_mask = AlignedWords::zeroed(mem::nyp_to_aligned_word_ct(raw_ct))?;
        codec::full_interleaved_mask(raw_ct, &mut full_mask);

        debug!("Opened reader on '{}' ({} byte workspace)", path.display(), header.reader_workspace_bytes());
        Ok(Self{header, subset, file, record_buf, raw_genovec, raw_mask, full_mask})
    }

    #[inline]
    pub fn header(&self) -> &PgenHeader {
        &self.header
    }

    #[inline]
    pub fn subset(&self) -> Option<&SampleSubset> {
        self.subset.as_deref()
    }

    /// Samples each decoded buffer covers: the subset size when bound, the
    /// raw sample count otherwise.
    #[inline]
    pub fn effective_sample_ct(&self) -> u32 {
        self.subset
            .as_deref()
            .map_or(self.header.raw_sample_ct(), SampleSubset::subset_sample_ct)
    }

    /// Words a caller-provided genovec buffer must hold.
    #[inline]
    pub fn genovec_word_ct(&self) -> usize {
        mem::nyp_to_aligned_word_ct(self.effective_sample_ct() as usize)
    }

    /// Words a caller-provided missingness bitmask must hold.
    #[inline]
    pub fn missing_word_ct(&self) -> usize {
        mem::bits_to_aligned_word_ct(self.effective_sample_ct() as usize)
    }

    /// Fetch the record of `vidx` into the landing buffer and validate its
    /// type; returns the record length.
    fn fetch_record(&mut self, vidx: u32) -> Result<usize, PgenError> {
        let (offset, len, vrtype) = self.header.record_span(vidx)?;
        if vrtype & 0x07 != 0 || vrtype & 0x80 != 0 {
            return Err(PgenError::UnsupportedVrtype{vidx, vrtype});
        }
        if vrtype & 0x08 != 0 {
            return Err(PgenError::NotImplemented{feature: "phased hardcall tracks"});
        }
        if vrtype & 0x70 != 0 {
            return Err(PgenError::NotImplemented{feature: "variable-width dosage tracks"});
        }
        if len < self.header.genovec_bytes() {
            return Err(PgenError::TruncatedRecord{vidx, len, need: self.header.genovec_bytes()});
        }
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|source| PgenError::RecordRead{vidx, source})?;
        self.file
            .read_exact(&mut self.record_buf.as_mut_bytes()[..len])
            .map_err(|source| PgenError::RecordRead{vidx, source})?;
        Ok(len)
    }

    /// Decode the raw-sample-space genovec of `vidx` into scratch.
    fn load_raw(&mut self, vidx: u32) -> Result<usize, PgenError> {
        let len = self.fetch_record(vidx)?;
        let sample_ct = self.header.raw_sample_ct() as usize;
        let record = &self.record_buf.as_bytes()[..self.header.genovec_bytes()];
        match self.header.mode() {
            StorageMode::Bed => codec::unpack_bed_genovec(record, sample_ct, self.raw_genovec.as_mut_slice()),
            _ => codec::unpack_genovec(record, sample_ct, self.raw_genovec.as_mut_slice()),
        }
        Ok(len)
    }

    /// Dense, subset-aware genovec decode of `vidx` into `out`.
    pub fn read(&mut self, vidx: u32, out: &mut [u64]) -> Result<(), PgenError> {
        self.load_raw(vidx)?;
        match self.subset.as_deref() {
            Some(s) => codec::subset_genovec(
                &self.raw_genovec,
                s.include(),
                s.subset_sample_ct() as usize,
                out,
            ),
            None => {
                let n = out.len().min(self.raw_genovec.len());
                out[..n].copy_from_slice(&self.raw_genovec[..n]);
            }
        }
        Ok(())
    }

    /// Fast-count path: genotype category counts of `vidx` over the bound
    /// subset, without materializing a contracted genovec.
    pub fn read_counts(&mut self, vidx: u32) -> Result<GenoCounts, PgenError> {
        self.load_raw(vidx)?;
        let mask = match self.subset.as_deref() {
            Some(s) => s.interleaved(),
            None => self.full_mask.as_slice(),
        };
        Ok(codec::count_codes_masked(&self.raw_genovec, mask))
    }

    /// Missingness-only path: one bit per effective sample in `out`.
    pub fn read_missingness(&mut self, vidx: u32, out: &mut [u64]) -> Result<(), PgenError> {
        self.load_raw(vidx)?;
        let raw_ct = self.header.raw_sample_ct() as usize;
        codec::missing_mask(&self.raw_genovec, raw_ct, self.raw_mask.as_mut_slice());
        match self.subset.as_deref() {
            Some(s) => codec::compact_mask(&self.raw_mask, s.include(), s.cumulative_popcounts(), out),
            None => {
                let n = out.len().min(self.raw_mask.len());
                out[..n].copy_from_slice(&self.raw_mask[..n]);
            }
        }
        Ok(())
    }

    /// Dense dosage decode of `vidx`.
    ///
    /// Files without a dosage track fall back to hardcall-derived dosages;
    /// the missing sentinel marks samples with neither a dosage nor a call.
    pub fn read_dosages(&mut self, vidx: u32, buf: &mut DosageBuf) -> Result<(), PgenError> {
        let len = self.load_raw(vidx)?;
        buf.reset();
        let raw_ct = self.header.raw_sample_ct() as usize;
        let effective = self.effective_sample_ct() as usize;

        let track_bytes = 2 * raw_ct;
        let dosage_track = if self.header.has_dosage_track() {
            let start = self.header.genovec_bytes();
            if len < start + track_bytes {
                return Err(PgenError::TruncatedRecord{vidx, len, need: start + track_bytes});
            }
            Some(&self.record_buf.as_bytes()[start..start + track_bytes])
        } else {
            None
        };

        for slot in 0..effective {
            let raw_idx = match self.subset.as_deref() {
                Some(s) => s.indices()[slot] as usize,
                None => slot,
            };
            let from_track = dosage_track.and_then(|track| {
                let raw = u16::from_le_bytes([track[2 * raw_idx], track[2 * raw_idx + 1]]);
                codec::dosage_from_raw(raw)
            });
            let dosage = from_track
                .or_else(|| codec::dosage_from_hardcall(codec::get_nyp(&self.raw_genovec, raw_idx)));
            if let Some(value) = dosage {
                mem::set_bit(&mut buf.present, slot);
                buf.dense.push(value);
                buf.doubles[slot] = value;
                buf.present_ct += 1;
            }
        }
        Ok(())
    }
}

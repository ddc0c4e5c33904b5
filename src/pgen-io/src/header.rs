use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::PgenError;
use crate::mem::CACHELINE_BYTES;

/// Leading magic bytes of every PGEN file; the third byte selects the
/// storage mode.
pub const PGEN_MAGIC: [u8; 2] = [0x6c, 0x1b];

/// Variants per record-index block in standard (variable-width) mode.
const BLOCK_VARIANT_CT: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// PLINK 1 `.bed` passthrough: fixed width, no embedded counts.
    Bed,
    /// Fixed-width 2-bit records with embedded counts.
    Fixed,
    /// Fixed-width records with a trailing 16-bit unphased dosage track.
    FixedDosage,
    /// Variable-record-width mode with per-variant type and length tables.
    Standard,
}

impl StorageMode {
    fn from_byte(byte: u8) -> Result<Self, PgenError> {
        match byte {
            0x01 => Ok(Self::Bed),
            0x02 => Ok(Self::Fixed),
            0x03 => Ok(Self::FixedDosage),
            0x10 => Ok(Self::Standard),
            mode => Err(PgenError::UnsupportedMode{mode}),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Bed => 0x01,
            Self::Fixed => 0x02,
            Self::FixedDosage => 0x03,
            Self::Standard => 0x10,
        }
    }
}

/// Per-variant record placement, resolved during populate.
#[derive(Debug)]
enum RecordLayout {
    Fixed { data_offset: u64, width: usize },
    Indexed { offsets: Vec<u64>, lens: Vec<u32>, vrtypes: Vec<u8> },
}

/// First phase of header initialization: magic, storage mode and counts.
///
/// A probe holds an open handle on the file; [`HeaderProbe::populate`]
/// consumes it to resolve the record-layout tables into an immutable
/// [`PgenHeader`].
#[derive(Debug)]
pub struct HeaderProbe {
    path: PathBuf,
    file: File,
    file_len: u64,
    mode: StorageMode,
    raw_variant_ct: u32,
    raw_sample_ct: u32,
    header_ctrl: u8,
    table_offset: u64,
}

fn read_u32(file: &mut File, path: &Path) -> Result<u32, PgenError> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)
        .map_err(|_| PgenError::TruncatedHeader{path: path.to_path_buf()})?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(file: &mut File, path: &Path) -> Result<u64, PgenError> {
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)
        .map_err(|_| PgenError::TruncatedHeader{path: path.to_path_buf()})?;
    Ok(u64::from_le_bytes(buf))
}

impl HeaderProbe {
    /// Open `path` and read the fixed part of the header.
    ///
    /// `counts_hint` supplies `(variant_ct, sample_ct)` for `.bed` inputs,
    /// whose header embeds neither; it is ignored whenever the file carries
    /// its own counts.
    ///
    /// # Errors
    /// `Open`, `BadMagic`, `TruncatedHeader`, `UnsupportedMode`, or
    /// `MissingCountHints` for a `.bed` probe without sidecar counts.
    pub fn new(path: &Path, counts_hint: Option<(u32, u32)>) -> Result<Self, PgenError> {
        let mut file = File::open(path)
            .map_err(|source| PgenError::Open{path: path.to_path_buf(), source})?;
        let file_len = file
            .metadata()
            .map_err(|source| PgenError::Open{path: path.to_path_buf(), source})?
            .len();

        let mut magic = [0u8; 3];
        file.read_exact(&mut magic)
            .map_err(|_| PgenError::TruncatedHeader{path: path.to_path_buf()})?;
        if magic[..2] != PGEN_MAGIC {
            return Err(PgenError::BadMagic{path: path.to_path_buf()});
        }
        let mode = StorageMode::from_byte(magic[2])?;

        let (raw_variant_ct, raw_sample_ct, header_ctrl) = match mode {
            StorageMode::Bed => {
                let Some((variant_ct, sample_ct)) = counts_hint else {
                    return Err(PgenError::MissingCountHints{mode: mode.code()});
                };
                (variant_ct, sample_ct, 0)
            }
            StorageMode::Fixed | StorageMode::FixedDosage => {
                let variant_ct = read_u32(&mut file, path)?;
                let sample_ct = read_u32(&mut file, path)?;
                (variant_ct, sample_ct, 0)
            }
            StorageMode::Standard => {
                let variant_ct = read_u32(&mut file, path)?;
                let sample_ct = read_u32(&mut file, path)?;
                let mut ctrl = [0u8; 1];
                file.read_exact(&mut ctrl)
                    .map_err(|_| PgenError::TruncatedHeader{path: path.to_path_buf()})?;
                (variant_ct, sample_ct, ctrl[0])
            }
        };

        let table_offset = file
            .stream_position()
            .map_err(|source| PgenError::Open{path: path.to_path_buf(), source})?;
        debug!(
            "Probed '{}': mode {:#04x}, {raw_variant_ct} variants, {raw_sample_ct} samples",
            path.display(), mode.code()
        );
        Ok(Self{path: path.to_path_buf(), file, file_len, mode, raw_variant_ct, raw_sample_ct, header_ctrl, table_offset})
    }

    #[inline]
    pub fn raw_variant_ct(&self) -> u32 {
        self.raw_variant_ct
    }

    #[inline]
    pub fn raw_sample_ct(&self) -> u32 {
        self.raw_sample_ct
    }

    #[inline]
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Second phase: resolve the record-layout tables and seal the header.
    ///
    /// # Errors
    /// `GeometryMismatch` when the file cannot hold the records the header
    /// implies; `NotImplemented` for standard-mode features outside this
    /// reader's coverage; `TruncatedHeader` on short index tables.
    pub fn populate(mut self) -> Result<PgenHeader, PgenError> {
        let genovec_bytes = (self.raw_sample_ct as usize).div_ceil(4);
        let (layout, max_record_width) = match self.mode {
            StorageMode::Bed | StorageMode::Fixed => {
                let width = genovec_bytes;
                self.check_fixed_geometry(width)?;
                (RecordLayout::Fixed{data_offset: self.table_offset, width}, width)
            }
            StorageMode::FixedDosage => {
                let width = genovec_bytes + 2 * self.raw_sample_ct as usize;
                self.check_fixed_geometry(width)?;
                (RecordLayout::Fixed{data_offset: self.table_offset, width}, width)
            }
            StorageMode::Standard => self.populate_standard()?,
        };

        info!(
            "Loaded PGEN header of '{}': {} variants x {} samples, max record width {max_record_width}",
            self.path.display(), self.raw_variant_ct, self.raw_sample_ct
        );
        Ok(PgenHeader{
            path: self.path,
            mode: self.mode,
            raw_variant_ct: self.raw_variant_ct,
            raw_sample_ct: self.raw_sample_ct,
            genovec_bytes,
            layout,
            max_record_width,
        })
    }

    fn check_fixed_geometry(&self, width: usize) -> Result<(), PgenError> {
        let expected = self.table_offset + u64::from(self.raw_variant_ct) * width as u64;
        if self.file_len != expected {
            return Err(PgenError::GeometryMismatch{
                path: self.path.clone(),
                expected,
                actual: self.file_len,
            });
        }
        Ok(())
    }

    /// Standard-mode record index: 64-bit block start offsets every 2^16
    /// variants, then per block a variant-record-type table and a
    /// record-length table. The header control byte picks the table widths:
    /// low nibble 0..=3 selects 4-bit vrtypes with `n+1`-byte lengths,
    /// 4..=7 selects 8-bit vrtypes with `n-3`-byte lengths.
    fn populate_standard(&mut self) -> Result<(RecordLayout, usize), PgenError> {
        let ctrl = self.header_ctrl;
        if ctrl & 0x30 != 0 {
            return Err(PgenError::NotImplemented{feature: "multiallelic record tables"});
        }
        if ctrl & 0xC0 != 0 {
            return Err(PgenError::NotImplemented{feature: "provisional-reference allele flags"});
        }
        let low = ctrl & 0x0f;
        let (nibble_vrtypes, len_bytes) = match low {
            0..=3 => (true, low as usize + 1),
            4..=7 => (false, low as usize - 3),
            _ => return Err(PgenError::NotImplemented{feature: "extended header layouts"}),
        };

        let variant_ct = self.raw_variant_ct;
        let block_ct = variant_ct.div_ceil(BLOCK_VARIANT_CT);
        self.file
            .seek(SeekFrom::Start(self.table_offset))
            .map_err(|source| PgenError::Open{path: self.path.clone(), source})?;
        let mut block_offsets = Vec::with_capacity(block_ct as usize);
        for _ in 0..block_ct {
            block_offsets.push(read_u64(&mut self.file, &self.path)?);
        }

        let mut vrtypes = Vec::with_capacity(variant_ct as usize);
        let mut lens = Vec::with_capacity(variant_ct as usize);
        for block_idx in 0..block_ct {
            let block_vct = (variant_ct - block_idx * BLOCK_VARIANT_CT).min(BLOCK_VARIANT_CT) as usize;

            if nibble_vrtypes {
                let mut packed = vec![0u8; block_vct.div_ceil(2)];
                self.file.read_exact(&mut packed)
                    .map_err(|_| PgenError::TruncatedHeader{path: self.path.clone()})?;
                for idx in 0..block_vct {
                    let byte = packed[idx / 2];
                    vrtypes.push(if idx % 2 == 0 { byte & 0x0f } else { byte >> 4 });
                }
            } else {
                let start = vrtypes.len();
                vrtypes.resize(start + block_vct, 0);
                self.file.read_exact(&mut vrtypes[start..])
                    .map_err(|_| PgenError::TruncatedHeader{path: self.path.clone()})?;
            }

            let mut raw_lens = vec![0u8; block_vct * len_bytes];
            self.file.read_exact(&mut raw_lens)
                .map_err(|_| PgenError::TruncatedHeader{path: self.path.clone()})?;
            for chunk in raw_lens.chunks_exact(len_bytes) {
                let mut len = 0u32;
                for (shift, &byte) in chunk.iter().enumerate() {
                    len |= u32::from(byte) << (shift * 8);
                }
                lens.push(len);
            }
        }

        // ---- Resolve absolute record offsets per block.
        let mut offsets = Vec::with_capacity(variant_ct as usize);
        let mut max_width = 0usize;
        for (vidx, &len) in lens.iter().enumerate() {
            let block_idx = vidx / BLOCK_VARIANT_CT as usize;
            if vidx % BLOCK_VARIANT_CT as usize == 0 {
                offsets.push(block_offsets[block_idx]);
            } else {
                offsets.push(offsets[vidx - 1] + u64::from(lens[vidx - 1]));
            }
            max_width = max_width.max(len as usize);
        }
        if let (Some(&last_offset), Some(&last_len)) = (offsets.last(), lens.last()) {
            let end = last_offset + u64::from(last_len);
            if end > self.file_len {
                return Err(PgenError::GeometryMismatch{
                    path: self.path.clone(),
                    expected: end,
                    actual: self.file_len,
                });
            }
        }

        Ok((RecordLayout::Indexed{offsets, lens, vrtypes}, max_width))
    }
}

/// Immutable PGEN header context: counts, storage mode and the resolved
/// record layout. Outlives every reader constructed from it (readers hold it
/// through an `Arc`, so teardown order is enforced by ownership).
#[derive(Debug)]
pub struct PgenHeader {
    path: PathBuf,
    mode: StorageMode,
    raw_variant_ct: u32,
    raw_sample_ct: u32,
    genovec_bytes: usize,
    layout: RecordLayout,
    max_record_width: usize,
}

impl PgenHeader {
    /// Probe and populate in one step.
    pub fn from_file(path: &Path, counts_hint: Option<(u32, u32)>) -> Result<Self, PgenError> {
        HeaderProbe::new(path, counts_hint)?.populate()
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    #[inline]
    pub fn raw_variant_ct(&self) -> u32 {
        self.raw_variant_ct
    }

    #[inline]
    pub fn raw_sample_ct(&self) -> u32 {
        self.raw_sample_ct
    }

    /// Bytes of the 2-bit genotype track of any plain record.
    #[inline]
    pub fn genovec_bytes(&self) -> usize {
        self.genovec_bytes
    }

    #[inline]
    pub fn max_record_width(&self) -> usize {
        self.max_record_width
    }

    /// Size of the per-reader record landing buffer, padded to whole cache
    /// lines.
    #[inline]
    pub fn reader_workspace_bytes(&self) -> usize {
        self.max_record_width.next_multiple_of(CACHELINE_BYTES).max(CACHELINE_BYTES)
    }

    /// Whether records carry an explicit dosage track.
    #[inline]
    pub fn has_dosage_track(&self) -> bool {
        self.mode == StorageMode::FixedDosage
    }

    /// Locate the record of `vidx`: `(offset, len, vrtype)`.
    pub(crate) fn record_span(&self, vidx: u32) -> Result<(u64, usize, u8), PgenError> {
        if vidx >= self.raw_variant_ct {
            return Err(PgenError::VariantOutOfRange{vidx, variant_ct: self.raw_variant_ct});
        }
        match &self.layout {
            RecordLayout::Fixed{data_offset, width} => {
                Ok((data_offset + u64::from(vidx) * *width as u64, *width, 0))
            }
            RecordLayout::Indexed{offsets, lens, vrtypes} => {
                let idx = vidx as usize;
                Ok((offsets[idx], lens[idx] as usize, vrtypes[idx]))
            }
        }
    }
}

use std::fs::File;
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use log::{debug, info};
use memmap2::Mmap;

mod error;
pub use error::VariantMetaError;

/// Logical variant metadata fields, in output-column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantField {
    Chrom,
    Pos,
    Id,
    Ref,
    Alt,
    Cm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SidecarFormat {
    /// `#CHROM`-headed, tab-delimited, dynamic column set.
    Pvar,
    /// Headerless, whitespace-delimited, fixed six columns
    /// `{chrom, id, cm, pos, alt, ref}`.
    Bim,
}

/// BIM physical column of each logical field `{chrom, pos, id, ref, alt, cm}`.
const BIM_COLUMNS: [usize; 6] = [0, 3, 1, 5, 4, 2];

/// Memory-mapped variant sidecar with a per-line byte-offset index.
///
/// Field values are extracted on demand by re-splitting the indexed line, so
/// a load touches each byte once and `get` stays zero-copy. The struct is
/// immutable after construction and shared freely across scan threads.
#[derive(Debug)]
pub struct VariantMeta {
    path: PathBuf,
    mmap: Mmap,
    /// `(start, end)` byte span of each data line, exclusive of the
    /// terminator (and of a CR under CRLF).
    line_spans: Vec<(usize, usize)>,
    format: SidecarFormat,
    /// Physical column of each logical field; `usize::MAX` when absent.
    columns: [usize; 6],
    /// Fields any data row must reach (highest required physical column).
    min_fields: usize,
}

const ABSENT: usize = usize::MAX;

impl VariantMeta {
    /// Map `path` and index its lines.
    ///
    /// # Errors
    /// `Open` on I/O failures; `Empty` when no data lines remain after
    /// comments and headers; `UnexpectedHeader`/`MissingColumn` on malformed
    /// PVAR headers.
    pub fn load(path: &Path) -> Result<Self, VariantMetaError> {
        let open_err = |source| VariantMetaError::Open{path: path.to_path_buf(), source};
        let file = File::open(path).map_err(open_err)?;
        // SAFETY: the mapping is held privately and read-only for the
        // lifetime of self; concurrent truncation is undefined behavior we
        // accept for sidecar files, as for any mmap-backed reader.
        let mmap = unsafe { Mmap::map(&file).map_err(open_err)? };
        info!("Indexing variant sidecar '{}' ({} bytes)", path.display(), mmap.len());

        let mut lines = LineIter::new(&mmap);

        // ---- Skip `##` comments, then classify the first meaningful line.
        let mut first = None;
        for span in lines.by_ref() {
            if mmap[span.0..span.1].starts_with(b"##") {
                continue;
            }
            first = Some(span);
            break;
        }
        let Some(first) = first else {
            return Err(VariantMetaError::Empty{path: path.to_path_buf()});
        };

        let first_text = std::str::from_utf8(&mmap[first.0..first.1]).unwrap_or("");
        let (format, columns, header_consumed) = if first_text.starts_with("#CHROM") {
            (SidecarFormat::Pvar, Self::map_pvar_columns(path, first_text)?, true)
        } else if first_text.starts_with('#') {
            return Err(VariantMetaError::UnexpectedHeader{path: path.to_path_buf()});
        } else {
            (SidecarFormat::Bim, BIM_COLUMNS, false)
        };

        let mut line_spans: Vec<(usize, usize)> = Vec::new();
        if !header_consumed {
            line_spans.push(first);
        }
        line_spans.extend(lines);

        if line_spans.is_empty() {
            return Err(VariantMetaError::Empty{path: path.to_path_buf()});
        }
        let min_fields = columns
            .iter()
            .filter(|&&c| c != ABSENT)
            .max()
            .map_or(0, |&c| c + 1);
        debug!("'{}': {} variants, {:?} layout", path.display(), line_spans.len(), format);
        Ok(Self{path: path.to_path_buf(), mmap, line_spans, format, columns, min_fields})
    }

    /// Resolve the `#CHROM ...` header into logical column positions.
    fn map_pvar_columns(path: &Path, header: &str) -> Result<[usize; 6], VariantMetaError> {
        let mut columns = [ABSENT; 6];
        for (idx, name) in header.split('\t').enumerate() {
            let name = name.strip_prefix('#').unwrap_or(name);
            let logical = match name {
                "CHROM" => VariantField::Chrom,
                "POS" => VariantField::Pos,
                "ID" => VariantField::Id,
                "REF" => VariantField::Ref,
                "ALT" => VariantField::Alt,
                "CM" => VariantField::Cm,
                // QUAL / FILTER / INFO and any extra columns are carried in
                // the file but never surfaced.
                _ => continue,
            };
            columns[logical as usize] = idx;
        }
        for (field, name) in [
            (VariantField::Chrom, "CHROM"),
            (VariantField::Pos, "POS"),
            (VariantField::Id, "ID"),
            (VariantField::Ref, "REF"),
            (VariantField::Alt, "ALT"),
        ] {
            if columns[field as usize] == ABSENT {
                return Err(VariantMetaError::MissingColumn{path: path.to_path_buf(), name});
            }
        }
        Ok(columns)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn variant_ct(&self) -> u32 {
        self.line_spans.len() as u32
    }

    /// Raw text of the field, `None` when the column is absent from the
    /// file. `.` is surfaced verbatim here; use the typed accessors for
    /// missing-value normalization.
    pub fn get(&self, vidx: u32, field: VariantField) -> Result<Option<&str>, VariantMetaError> {
        let span = self
            .line_spans
            .get(vidx as usize)
            .ok_or(VariantMetaError::OutOfBounds{vidx, variant_ct: self.variant_ct()})?;
        let col = self.columns[field as usize];
        if col == ABSENT {
            return Ok(None);
        }
        let line = std::str::from_utf8(&self.mmap[span.0..span.1]).unwrap_or("");
        let mut have = 0usize;
        for (idx, value) in FieldIter::new(line, self.format).enumerate() {
            if idx == col {
                return Ok(Some(value));
            }
            have = idx + 1;
        }
        Err(VariantMetaError::TooFewFields{
            line: vidx as usize + 1,
            have,
            need: self.min_fields,
        })
    }

    fn required(&self, vidx: u32, field: VariantField) -> Result<&str, VariantMetaError> {
        // Required columns are validated at load time, so absence here can
        // only mean a short data row.
        self.get(vidx, field)?.ok_or(VariantMetaError::TooFewFields{
            line: vidx as usize + 1,
            have: 0,
            need: self.min_fields,
        })
    }

    pub fn chrom(&self, vidx: u32) -> Result<&str, VariantMetaError> {
        self.required(vidx, VariantField::Chrom)
    }

    pub fn pos(&self, vidx: u32) -> Result<u32, VariantMetaError> {
        let text = self.required(vidx, VariantField::Pos)?;
        text.parse().map_err(|_| VariantMetaError::BadPosition{
            line: vidx as usize + 1,
            value: text.to_string(),
        })
    }

    /// Variant id; `.` normalizes to `None`.
    pub fn id(&self, vidx: u32) -> Result<Option<&str>, VariantMetaError> {
        Ok(normalize_dot(self.required(vidx, VariantField::Id)?))
    }

    pub fn refa(&self, vidx: u32) -> Result<&str, VariantMetaError> {
        self.required(vidx, VariantField::Ref)
    }

    /// ALT allele; `.` normalizes to `None`.
    pub fn alt(&self, vidx: u32) -> Result<Option<&str>, VariantMetaError> {
        Ok(normalize_dot(self.required(vidx, VariantField::Alt)?))
    }

    /// Centimorgan coordinate, when the file carries one.
    pub fn cm(&self, vidx: u32) -> Result<Option<f64>, VariantMetaError> {
        let Some(text) = self.get(vidx, VariantField::Cm)? else {
            return Ok(None);
        };
        match normalize_dot(text) {
            None => Ok(None),
            Some(text) => text.parse().map(Some).map_err(|_| VariantMetaError::BadCm{
                line: vidx as usize + 1,
                value: text.to_string(),
            }),
        }
    }

    /// `id -> vidx` over all named variants; first occurrence wins.
    pub fn id_map(&self) -> Result<AHashMap<String, u32>, VariantMetaError> {
        let mut map = AHashMap::with_capacity(self.line_spans.len());
        for vidx in 0..self.variant_ct() {
            if let Some(id) = self.id(vidx)? {
                map.entry(id.to_string()).or_insert(vidx);
            }
        }
        Ok(map)
    }

    /// Materialize the eager columnar form consumed by per-row emitters.
    pub fn columns(&self) -> Result<MetaColumns, VariantMetaError> {
        let n = self.variant_ct() as usize;
        let mut columns = MetaColumns{
            chroms: Vec::with_capacity(n),
            positions: Vec::with_capacity(n),
            ids: Vec::with_capacity(n),
            refs: Vec::with_capacity(n),
            alts: Vec::with_capacity(n),
        };
        for vidx in 0..self.variant_ct() {
            columns.chroms.push(self.chrom(vidx)?.to_string());
            columns.positions.push(self.pos(vidx)?);
            columns.ids.push(self.id(vidx)?.map(str::to_string));
            columns.refs.push(self.refa(vidx)?.to_string());
            columns.alts.push(self.alt(vidx)?.map(str::to_string));
        }
        Ok(columns)
    }
}

#[inline]
fn normalize_dot(text: &str) -> Option<&str> {
    match text {
        "." => None,
        other => Some(other),
    }
}

/// Dense parsed columns for kernels that touch metadata on every output row.
#[derive(Debug)]
pub struct MetaColumns {
    pub chroms: Vec<String>,
    pub positions: Vec<u32>,
    pub ids: Vec<Option<String>>,
    pub refs: Vec<String>,
    pub alts: Vec<Option<String>>,
}

/// Iterator over `(start, end)` line spans, dropping terminators, CRs and a
/// final empty line.
struct LineIter<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> LineIter<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self{bytes, cursor: 0}
    }
}

impl Iterator for LineIter<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        while self.cursor < self.bytes.len() {
            let start = self.cursor;
            let mut end = self.bytes[start..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(self.bytes.len(), |rel| start + rel);
            self.cursor = end + 1;
            if end > start && self.bytes[end - 1] == b'\r' {
                end -= 1;
            }
            if start == end {
                continue; // Blank line; never a record.
            }
            return Some((start, end));
        }
        None
    }
}

/// Per-format field splitter: PVAR is strictly tab-delimited, BIM splits on
/// any whitespace run.
enum FieldIter<'a> {
    Tabs(std::str::Split<'a, char>),
    Whitespace(std::str::SplitAsciiWhitespace<'a>),
}

impl<'a> FieldIter<'a> {
    fn new(line: &'a str, format: SidecarFormat) -> Self {
        match format {
            SidecarFormat::Pvar => Self::Tabs(line.split('\t')),
            SidecarFormat::Bim => Self::Whitespace(line.split_ascii_whitespace()),
        }
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        match self {
            Self::Tabs(it) => it.next(),
            Self::Whitespace(it) => it.next(),
        }
    }
}

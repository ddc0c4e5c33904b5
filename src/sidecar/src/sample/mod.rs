use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use log::info;

mod error;
pub use error::SampleMetaError;

/// One parsed sample row, missing values already normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub fid: Option<String>,
    pub iid: String,
    pub pat: Option<String>,
    pub mat: Option<String>,
    pub sex: Option<i32>,
    /// Remaining (phenotype) columns, aligned with
    /// [`SampleMeta::pheno_names`].
    pub phenos: Vec<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleFormat {
    /// `#FID`-headed PSAM.
    PsamFid,
    /// `#IID`-headed PSAM (no family ids).
    PsamIid,
    /// Headerless six-column FAM.
    Fam,
}

/// Eagerly parsed sample sidecar with an `iid -> sample_idx` map.
///
/// Sample sidecars are small, so unlike the variant index this table owns
/// every parsed value outright.
#[derive(Debug)]
pub struct SampleMeta {
    path: PathBuf,
    records: Vec<SampleRecord>,
    iid_index: AHashMap<String, u32>,
    pheno_names: Vec<String>,
}

impl SampleMeta {
    /// Parse `path`, detecting PSAM (with or without FID) vs FAM from the
    /// first line.
    ///
    /// # Errors
    /// `Empty`, `MissingIid`, `TooFewFields`, `BadSex` or `DuplicateSample`,
    /// all detected before any record is surfaced.
    pub fn load(path: &Path) -> Result<Self, SampleMetaError> {
        let open_err = |source| SampleMetaError::Open{path: path.to_path_buf(), source};
        let reader = BufReader::new(File::open(path).map_err(open_err)?);
        let mut lines = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(open_err)?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        let Some(first) = lines.first() else {
            return Err(SampleMetaError::Empty{path: path.to_path_buf()});
        };

        let (format, header): (SampleFormat, Option<&str>) = if first.starts_with("#FID") {
            (SampleFormat::PsamFid, Some(first.as_str()))
        } else if first.starts_with("#IID") {
            (SampleFormat::PsamIid, Some(first.as_str()))
        } else {
            (SampleFormat::Fam, None)
        };

        // ---- Column layout: PSAM headers are mapped by name, FAM is fixed.
        let layout = match header {
            Some(header) => ColumnLayout::from_psam_header(path, header, format)?,
            None => ColumnLayout::fam(),
        };

        let data_start = usize::from(header.is_some());
        let mut records = Vec::with_capacity(lines.len() - data_start);
        let mut iid_index = AHashMap::with_capacity(lines.len() - data_start);
        for (line_no, line) in lines.iter().enumerate().skip(data_start) {
            let record = layout.parse_row(line, line_no + 1, format)?;
            if iid_index.insert(record.iid.clone(), records.len() as u32).is_some() {
                return Err(SampleMetaError::DuplicateSample{iid: record.iid, line: line_no + 1});
            }
            records.push(record);
        }
        if records.is_empty() {
            return Err(SampleMetaError::Empty{path: path.to_path_buf()});
        }

        info!("Loaded {} samples from '{}'", records.len(), path.display());
        Ok(Self{path: path.to_path_buf(), records, iid_index, pheno_names: layout.pheno_names})
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn sample_ct(&self) -> u32 {
        self.records.len() as u32
    }

    #[inline]
    pub fn get(&self, sample_idx: u32) -> &SampleRecord {
        &self.records[sample_idx as usize]
    }

    /// Index of a sample id, `None` when unknown.
    #[inline]
    pub fn iid_to_idx(&self, iid: &str) -> Option<u32> {
        self.iid_index.get(iid).copied()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &SampleRecord> {
        self.records.iter()
    }

    /// Names of the phenotype columns carried by the file.
    #[inline]
    pub fn pheno_names(&self) -> &[String] {
        &self.pheno_names
    }
}

/// Physical positions of the well-known columns plus the phenotype tail.
struct ColumnLayout {
    fid: Option<usize>,
    iid: usize,
    pat: Option<usize>,
    mat: Option<usize>,
    sex: Option<usize>,
    /// Physical columns of the phenotype tail.
    phenos: Vec<usize>,
    pheno_names: Vec<String>,
    min_fields: usize,
}

impl ColumnLayout {
    fn from_psam_header(
        path: &Path,
        header: &str,
        format: SampleFormat,
    ) -> Result<Self, SampleMetaError> {
        let mut layout = Self{
            fid: None,
            iid: usize::MAX,
            pat: None,
            mat: None,
            sex: None,
            phenos: Vec::new(),
            pheno_names: Vec::new(),
            min_fields: 0,
        };
        for (idx, name) in header.split('\t').enumerate() {
            let name = name.strip_prefix('#').unwrap_or(name);
            match name {
                "FID" => layout.fid = Some(idx),
                "IID" => layout.iid = idx,
                "PAT" => layout.pat = Some(idx),
                "MAT" => layout.mat = Some(idx),
                "SEX" => layout.sex = Some(idx),
                other => {
                    layout.phenos.push(idx);
                    layout.pheno_names.push(other.to_string());
                }
            }
        }
        if layout.iid == usize::MAX {
            return Err(SampleMetaError::MissingIid{path: path.to_path_buf()});
        }
        debug_assert!(matches!(format, SampleFormat::PsamFid | SampleFormat::PsamIid));
        layout.min_fields = layout.max_column() + 1;
        Ok(layout)
    }

    fn fam() -> Self {
        Self{
            fid: Some(0),
            iid: 1,
            pat: Some(2),
            mat: Some(3),
            sex: Some(4),
            phenos: vec![5],
            pheno_names: vec!["PHENO1".to_string()],
            min_fields: 6,
        }
    }

    fn max_column(&self) -> usize {
        let mut max = self.iid;
        for col in [self.fid, self.pat, self.mat, self.sex] {
            if let Some(col) = col {
                max = max.max(col);
            }
        }
        for &col in &self.phenos {
            max = max.max(col);
        }
        max
    }

    fn parse_row(
        &self,
        line: &str,
        line_no: usize,
        format: SampleFormat,
    ) -> Result<SampleRecord, SampleMetaError> {
        let fields: Vec<&str> = match format {
            SampleFormat::Fam => line.split_ascii_whitespace().collect(),
            _ => line.split('\t').collect(),
        };
        if fields.len() < self.min_fields {
            return Err(SampleMetaError::TooFewFields{
                line: line_no,
                have: fields.len(),
                need: self.min_fields,
            });
        }

        let sex = match self.sex.map(|col| fields[col]) {
            None => None,
            Some(text) => parse_sex(text).ok_or_else(|| SampleMetaError::BadSex{
                line: line_no,
                value: text.to_string(),
            })?,
        };

        // FAM keeps PLINK's `-9` phenotype sentinel verbatim; only the
        // generic missing markers normalize to null.
        let phenos = self
            .phenos
            .iter()
            .map(|&col| normalize_missing(fields[col]).map(str::to_string))
            .collect();

        Ok(SampleRecord{
            fid: self.fid.and_then(|col| normalize_missing(fields[col])).map(str::to_string),
            iid: fields[self.iid].to_string(),
            pat: self.pat.and_then(|col| normalize_parent(fields[col])).map(str::to_string),
            mat: self.mat.and_then(|col| normalize_parent(fields[col])).map(str::to_string),
            sex,
            phenos,
        })
    }
}

/// `{NA, ., ""}` normalize to null.
#[inline]
fn normalize_missing(text: &str) -> Option<&str> {
    match text {
        "" | "NA" | "." => None,
        other => Some(other),
    }
}

/// Parent ids additionally treat `0` as null.
#[inline]
fn normalize_parent(text: &str) -> Option<&str> {
    match text {
        "0" => None,
        other => normalize_missing(other),
    }
}

/// `Ok(None)` for a missing marker, `Ok(Some)` for 1/2, `None` = unparseable.
#[inline]
fn parse_sex(text: &str) -> Option<Option<i32>> {
    match text {
        "0" | "" | "NA" | "." => Some(None),
        "1" => Some(Some(1)),
        "2" => Some(Some(2)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load(content: &str) -> Result<SampleMeta, SampleMetaError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.psam");
        File::create(&path).unwrap().write_all(content.as_bytes()).unwrap();
        SampleMeta::load(&path)
    }

    #[test]
    fn psam_with_fid() {
        let meta = load(
            "#FID\tIID\tPAT\tMAT\tSEX\tHEIGHT\n\
             F1\tS1\t0\tNA\t1\t1.82\n\
             F1\tS2\tS1\t.\t2\tNA\n\
             0\tS3\t0\t0\t0\t.\n",
        )
        .unwrap();
        assert_eq!(meta.sample_ct(), 3);
        assert_eq!(meta.pheno_names(), &["HEIGHT".to_string()]);
        let s1 = meta.get(0);
        assert_eq!(s1.fid.as_deref(), Some("F1"));
        assert_eq!(s1.pat, None);
        assert_eq!(s1.mat, None);
        assert_eq!(s1.sex, Some(1));
        assert_eq!(s1.phenos, vec![Some("1.82".to_string())]);
        let s2 = meta.get(1);
        assert_eq!(s2.pat.as_deref(), Some("S1"));
        assert_eq!(s2.phenos, vec![None]);
        let s3 = meta.get(2);
        assert_eq!(s3.fid.as_deref(), Some("0"));
        assert_eq!(s3.sex, None);
        assert_eq!(meta.iid_to_idx("S2"), Some(1));
        assert_eq!(meta.iid_to_idx("missing"), None);
    }

    #[test]
    fn psam_without_fid() {
        let meta = load("#IID\tSEX\nS1\t2\nS2\t1\n").unwrap();
        assert_eq!(meta.get(0).fid, None);
        assert_eq!(meta.get(0).sex, Some(2));
        assert!(meta.pheno_names().is_empty());
    }

    #[test]
    fn fam_fixed_columns_preserve_minus_nine() {
        let meta = load(
            "F1 S1 0 0 1 -9\n\
             F1 S2 S1 0 2 12.5\n",
        )
        .unwrap();
        assert_eq!(meta.sample_ct(), 2);
        assert_eq!(meta.get(0).phenos, vec![Some("-9".to_string())]);
        assert_eq!(meta.get(1).phenos, vec![Some("12.5".to_string())]);
        assert_eq!(meta.get(1).pat.as_deref(), Some("S1"));
    }

    #[test]
    fn rejects_empty_and_missing_iid() {
        assert!(matches!(load("").unwrap_err(), SampleMetaError::Empty{..}));
        assert!(matches!(load("#IID\tSEX\n").unwrap_err(), SampleMetaError::Empty{..}));
        assert!(matches!(
            load("#FID\tSEX\nF1\t1\n").unwrap_err(),
            SampleMetaError::MissingIid{..}
        ));
    }

    #[test]
    fn rejects_short_rows_bad_sex_and_duplicates() {
        assert!(matches!(
            load("#FID\tIID\tSEX\nF1\tS1\n").unwrap_err(),
            SampleMetaError::TooFewFields{line: 2, have: 2, need: 3}
        ));
        assert!(matches!(
            load("#IID\tSEX\nS1\t5\n").unwrap_err(),
            SampleMetaError::BadSex{line: 2, ..}
        ));
        assert!(matches!(
            load("#IID\nS1\nS1\n").unwrap_err(),
            SampleMetaError::DuplicateSample{line: 3, ..}
        ));
    }
}

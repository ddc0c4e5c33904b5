//! Shared fixtures: byte-level writers for the genotype container and its
//! sidecars, plus row-collection helpers over the scan API.
#![allow(dead_code)] // Each test binary uses its own slice of the helpers.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgen_scan::exec::{BoundScan, Kernel};
use pgen_scan::output::Vector;
use pgen_scan::{run_to_completion, OutputBatch, Projection, ROW_ID_COLUMN};

pub const MISSING: u8 = 3;

/// Pack 2-bit ALT-count codes (3 = missing) into record bytes.
pub fn pack_codes(codes: &[u8]) -> Vec<u8> {
    let mut record = vec![0u8; codes.len().div_ceil(4)];
    for (idx, &code) in codes.iter().enumerate() {
        record[idx / 4] |= (code & 3) << ((idx % 4) * 2);
    }
    record
}

fn write_file(path: &Path, bytes: &[u8]) {
    File::create(path).unwrap().write_all(bytes).unwrap();
}

/// Fixed-width genotype container (storage mode 0x02).
pub fn write_pgen(path: &Path, sample_ct: u32, variants: &[Vec<u8>]) {
    let mut bytes = vec![0x6c, 0x1b, 0x02];
    bytes.extend_from_slice(&(variants.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&sample_ct.to_le_bytes());
    for codes in variants {
        assert_eq!(codes.len() as u32, sample_ct);
        bytes.extend_from_slice(&pack_codes(codes));
    }
    write_file(path, &bytes);
}

/// Fixed-width container with a 16-bit dosage track (storage mode 0x03).
pub fn write_pgen_dosage(path: &Path, sample_ct: u32, variants: &[(Vec<u8>, Vec<u16>)]) {
    let mut bytes = vec![0x6c, 0x1b, 0x03];
    bytes.extend_from_slice(&(variants.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&sample_ct.to_le_bytes());
    for (codes, dosages) in variants {
        assert_eq!(codes.len() as u32, sample_ct);
        assert_eq!(dosages.len() as u32, sample_ct);
        bytes.extend_from_slice(&pack_codes(codes));
        for &dosage in dosages {
            bytes.extend_from_slice(&dosage.to_le_bytes());
        }
    }
    write_file(path, &bytes);
}

/// PLINK 1 `.bed` container (storage mode 0x01), taking ALT-count codes and
/// translating them to the `.bed` lane encoding.
pub fn write_bed(path: &Path, sample_ct: u32, variants: &[Vec<u8>]) {
    // ALT-count code -> .bed lane: 0->11, 1->10, 2->00, missing->01.
    const TO_BED: [u8; 4] = [0b11, 0b10, 0b00, 0b01];
    let mut bytes = vec![0x6c, 0x1b, 0x01];
    for codes in variants {
        assert_eq!(codes.len() as u32, sample_ct);
        let translated: Vec<u8> = codes.iter().map(|&c| TO_BED[c as usize]).collect();
        bytes.extend_from_slice(&pack_codes(&translated));
    }
    write_file(path, &bytes);
}

/// Standard variable-width container (storage mode 0x10) holding plain
/// records: 4-bit record types, 1-byte record lengths, one index block.
pub fn write_pgen_standard(path: &Path, sample_ct: u32, variants: &[Vec<u8>]) {
    let variant_ct = variants.len() as u32;
    assert!(variant_ct > 0 && variant_ct <= 0xFFFF);
    let records: Vec<Vec<u8>> = variants.iter().map(|codes| pack_codes(codes)).collect();

    let mut bytes = vec![0x6c, 0x1b, 0x10];
    bytes.extend_from_slice(&variant_ct.to_le_bytes());
    bytes.extend_from_slice(&sample_ct.to_le_bytes());
    bytes.push(0x00); // 4-bit vrtypes, 1-byte record lengths.

    let vrtype_bytes = (variants.len() + 1) / 2;
    let data_start = bytes.len() as u64 + 8 + vrtype_bytes as u64 + variants.len() as u64;
    bytes.extend_from_slice(&data_start.to_le_bytes());
    bytes.extend_from_slice(&vec![0u8; vrtype_bytes]);
    for record in &records {
        assert!(record.len() <= u8::MAX as usize);
        bytes.push(record.len() as u8);
    }
    for record in &records {
        bytes.extend_from_slice(record);
    }
    write_file(path, &bytes);
}

/// PVAR sidecar from `(chrom, pos, id, ref, alt)` rows; `.` marks nulls.
pub fn write_pvar(path: &Path, rows: &[(&str, u32, &str, &str, &str)]) {
    let mut text = String::from("#CHROM\tPOS\tID\tREF\tALT\n");
    for (chrom, pos, id, refa, alt) in rows {
        text.push_str(&format!("{chrom}\t{pos}\t{id}\t{refa}\t{alt}\n"));
    }
    write_file(path, text.as_bytes());
}

/// PSAM sidecar from `(fid, iid)` rows.
pub fn write_psam(path: &Path, rows: &[(&str, &str)]) {
    let mut text = String::from("#FID\tIID\tSEX\n");
    for (fid, iid) in rows {
        text.push_str(&format!("{fid}\t{iid}\t0\n"));
    }
    write_file(path, text.as_bytes());
}

/// Route `log` output through the test harness when `RUST_LOG` asks for it.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The reference 4x4 dataset used across the kernel scenarios.
///
/// Genotypes (rows = variants, columns = S1..S4, `.` = missing):
/// ```text
/// v1:  0  1  2  .
/// v2:  1  1  0  2
/// v3:  2  .  1  0
/// v4:  0  0  1  2
/// ```
pub fn fixture_a(dir: &Path) -> PathBuf {
    init_logging();
    let pgen = dir.join("fixture.pgen");
    write_pgen(
        &pgen,
        4,
        &[
            vec![0, 1, 2, MISSING],
            vec![1, 1, 0, 2],
            vec![2, MISSING, 1, 0],
            vec![0, 0, 1, 2],
        ],
    );
    write_pvar(
        &dir.join("fixture.pvar"),
        &[
            ("1", 100, "v1", "A", "G"),
            ("1", 200, "v2", "C", "T"),
            ("1", 300, "v3", "G", "A"),
            ("2", 100, "v4", "T", "C"),
        ],
    );
    write_psam(
        &dir.join("fixture.psam"),
        &[("F1", "S1"), ("F1", "S2"), ("F2", "S3"), ("F2", "S4")],
    );
    pgen
}

/// An owned cell extracted from an output vector.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Null,
    S(String),
    I(i64),
    F(f64),
}

impl Val {
    pub fn as_f64(&self) -> f64 {
        match self {
            Val::F(v) => *v,
            other => panic!("expected a float cell, got {other:?}"),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Val::I(v) => *v,
            other => panic!("expected an integer cell, got {other:?}"),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Val::S(v) => v,
            other => panic!("expected a string cell, got {other:?}"),
        }
    }
}

fn extract(vector: &Vector, row: usize) -> Val {
    match vector {
        Vector::Utf8{..} => vector.utf8(row).map_or(Val::Null, |v| Val::S(v.to_string())),
        Vector::Int32{..} => vector.i32(row).map_or(Val::Null, |v| Val::I(i64::from(v))),
        Vector::Int64{..} => vector.i64(row).map_or(Val::Null, Val::I),
        Vector::Float64{..} => vector.f64(row).map_or(Val::Null, Val::F),
    }
}

/// Flatten batches into rows.
pub fn rows_of(batches: &[OutputBatch], width: usize) -> Vec<Vec<Val>> {
    let mut rows = Vec::new();
    for batch in batches {
        for row in 0..batch.len() {
            rows.push((0..width).map(|slot| extract(batch.column(slot), row)).collect());
        }
    }
    rows
}

/// Run a bound scan with every schema column plus a trailing row id
/// projected, and return the rows sorted by row id (cross-thread batch
/// order is unspecified). The row-id column is stripped from the result.
pub fn collect_rows<K: Kernel>(bound: &Arc<BoundScan<K>>) -> Vec<Vec<Val>> {
    let mut columns: Vec<usize> = (0..bound.schema().len()).collect();
    columns.push(ROW_ID_COLUMN);
    let projection = Projection::new(columns);
    let width = projection.len();
    let batches = run_to_completion(Arc::clone(bound), projection).unwrap();
    let mut rows = rows_of(&batches, width);
    rows.sort_by_key(|row| row[width - 1].as_i64());
    for row in &mut rows {
        row.pop();
    }
    rows
}

/// Run with an explicit projection, unsorted.
pub fn collect_projected<K: Kernel>(
    bound: &Arc<BoundScan<K>>,
    columns: Vec<usize>,
) -> Vec<Vec<Val>> {
    let projection = Projection::new(columns);
    let width = projection.len();
    let batches = run_to_completion(Arc::clone(bound), projection).unwrap();
    rows_of(&batches, width)
}

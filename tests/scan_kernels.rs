//! End-to-end kernel scenarios over the reference 4x4 dataset.

mod common;

use common::{collect_rows, fixture_a, Val, MISSING};

use float_cmp::assert_approx_eq;
use itertools::Itertools;
use pgen_scan::{
    freq, hardy, ld, missing, score, CommonOptions, FreqOptions, HardyOptions, LdOptions,
    MissingMode, MissingOptions, SampleSelector, ScoreOptions, WeightEntry, WeightSpec,
};

#[test]
fn freq_over_full_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let bound = freq::bind(&pgen, FreqOptions::default()).unwrap();
    let rows = collect_rows(&bound);
    assert_eq!(rows.len(), 4);

    // (alt_freq, obs_ct) per variant.
    let expected = [(0.5, 6), (0.5, 8), (0.5, 6), (0.375, 8)];
    for (row, (alt_freq, obs_ct)) in rows.iter().zip(expected) {
        assert_approx_eq!(f64, row[5].as_f64(), alt_freq, epsilon = 1e-12);
        assert_eq!(row[6].as_i64(), obs_ct);
    }
    assert_eq!(rows[0][0], Val::S("1".to_string()));
    assert_eq!(rows[0][2], Val::S("v1".to_string()));
    assert_eq!(rows[3][0], Val::S("2".to_string()));
}

#[test]
fn freq_counts_columns() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = FreqOptions{counts: true, ..FreqOptions::default()};
    let bound = freq::bind(&pgen, options).unwrap();
    assert_eq!(bound.schema().len(), 11);
    let rows = collect_rows(&bound);

    // v1: one of each category.
    assert_eq!(rows[0][7].as_i64(), 1);
    assert_eq!(rows[0][8].as_i64(), 1);
    assert_eq!(rows[0][9].as_i64(), 1);
    assert_eq!(rows[0][10].as_i64(), 1);
    // Category counts always partition the effective samples.
    for row in &rows {
        let total: i64 = (7..=10).map(|c| row[c].as_i64()).sum();
        assert_eq!(total, 4);
    }
}

#[test]
fn freq_respects_sample_subset() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = FreqOptions{
        common: CommonOptions{
            samples: Some(SampleSelector::Ids(vec![
                "S1".to_string(),
                "S2".to_string(),
                "S3".to_string(),
            ])),
            ..CommonOptions::default()
        },
        ..FreqOptions::default()
    };
    let bound = freq::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);
    // v2 over S1..S3: codes {1, 1, 0} -> 2/6.
    assert_approx_eq!(f64, rows[1][5].as_f64(), 1.0 / 3.0, epsilon = 1e-12);
    assert_eq!(rows[1][6].as_i64(), 6);
    // v1 over S1..S3: codes {0, 1, 2} -> 3/6.
    assert_approx_eq!(f64, rows[0][5].as_f64(), 0.5, epsilon = 1e-12);
}

#[test]
fn freq_respects_region() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = FreqOptions{
        common: CommonOptions{region: Some("1:200-300".to_string()), ..CommonOptions::default()},
        ..FreqOptions::default()
    };
    let bound = freq::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][2], Val::S("v2".to_string()));
    assert_eq!(rows[1][2], Val::S("v3".to_string()));

    let options = FreqOptions{
        common: CommonOptions{region: Some("3:1-999".to_string()), ..CommonOptions::default()},
        ..FreqOptions::default()
    };
    let bound = freq::bind(&pgen, options).unwrap();
    assert!(collect_rows(&bound).is_empty());
}

#[test]
fn hardy_exact_p_values() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let bound = hardy::bind(&pgen, HardyOptions::default()).unwrap();
    let rows = collect_rows(&bound);
    assert_eq!(rows.len(), 4);

    // v1: (1, 1, 1) is as balanced as 3 samples get.
    assert_approx_eq!(f64, rows[0][10].as_f64(), 1.0, epsilon = 1e-9);
    // v4: (2, 1, 1) -> 3/7.
    assert_approx_eq!(f64, rows[3][10].as_f64(), 3.0 / 7.0, epsilon = 1e-9);
    assert_eq!(rows[3][5].as_i64(), 2);
    assert_eq!(rows[3][6].as_i64(), 1);
    assert_eq!(rows[3][7].as_i64(), 1);
    assert_approx_eq!(f64, rows[3][8].as_f64(), 0.25, epsilon = 1e-12);
    assert_approx_eq!(f64, rows[3][9].as_f64(), 0.46875, epsilon = 1e-12);
    for row in &rows {
        let p = row[10].as_f64();
        assert!((0.0..=1.0).contains(&p));
    }
}

#[test]
fn hardy_all_missing_variant_is_conventionally_one() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = dir.path().join("x.pgen");
    common::write_pgen(&pgen, 2, &[vec![MISSING, MISSING]]);
    common::write_pvar(&dir.path().join("x.pvar"), &[("1", 10, "v1", "A", "G")]);
    let bound = hardy::bind(&pgen, HardyOptions::default()).unwrap();
    let rows = collect_rows(&bound);
    assert_approx_eq!(f64, rows[0][10].as_f64(), 1.0, epsilon = 0.0);
    assert_eq!(rows[0][8], Val::Null);
    assert_eq!(rows[0][9], Val::Null);
}

#[test]
fn missing_variant_mode() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let bound = missing::bind(&pgen, MissingOptions::default()).unwrap();
    let rows = collect_rows(&bound);
    assert_eq!(rows.len(), 4);

    let expected = [(1, 3, 0.25), (0, 4, 0.0), (1, 3, 0.25), (0, 4, 0.0)];
    for (row, (missing_ct, obs_ct, f_miss)) in rows.iter().zip(expected) {
        assert_eq!(row[3].as_i64(), missing_ct);
        assert_eq!(row[4].as_i64(), obs_ct);
        assert_approx_eq!(f64, row[5].as_f64(), f_miss, epsilon = 1e-12);
    }
}

#[test]
fn missing_sample_mode() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = MissingOptions{mode: MissingMode::Sample, ..MissingOptions::default()};
    let bound = missing::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);
    assert_eq!(rows.len(), 4);

    let expected = [("S1", 0), ("S2", 1), ("S3", 0), ("S4", 1)];
    for (row, (iid, missing_ct)) in rows.iter().zip(expected) {
        assert_eq!(row[1].as_str(), iid);
        assert_eq!(row[2].as_i64(), missing_ct);
        assert_eq!(row[3].as_i64(), 4 - missing_ct);
        assert_approx_eq!(f64, row[4].as_f64(), missing_ct as f64 / 4.0, epsilon = 1e-12);
        // Per-sample missing and observed always rebuild the range length.
        assert_eq!(row[2].as_i64() + row[3].as_i64(), 4);
    }
    assert_eq!(rows[0][0].as_str(), "F1");
}

#[test]
fn missing_sample_mode_projected_counts_only() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = MissingOptions{mode: MissingMode::Sample, ..MissingOptions::default()};
    let bound = missing::bind(&pgen, options).unwrap();

    // A projection touching only {iid, missing_ct} must still run the
    // accumulation pass; sample mode is single-threaded, so rows arrive in
    // ascending sample order.
    let rows = common::collect_projected(&bound, vec![1, 2]);
    assert_eq!(rows.len(), 4);
    let expected = [("S1", 0i64), ("S2", 1), ("S3", 0), ("S4", 1)];
    for (row, (iid, missing_ct)) in rows.iter().zip(expected) {
        assert_eq!(row[0].as_str(), iid);
        assert_eq!(row[1].as_i64(), missing_ct);
    }
}

#[test]
fn missing_sample_mode_with_region() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = MissingOptions{
        common: CommonOptions{region: Some("1:100-300".to_string()), ..CommonOptions::default()},
        mode: MissingMode::Sample,
    };
    let bound = missing::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);
    // Range is v1..v3; S2 misses v3, S4 misses v1.
    let expected = [0i64, 1, 0, 1];
    for (row, missing_ct) in rows.iter().zip(expected) {
        assert_eq!(row[2].as_i64(), missing_ct);
        assert_eq!(row[3].as_i64(), 3 - missing_ct);
    }
}

#[test]
fn ld_single_pair() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = LdOptions{
        variant1: Some("v1".to_string()),
        variant2: Some("v2".to_string()),
        ..LdOptions::default()
    };
    let bound = ld::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][2], Val::S("v1".to_string()));
    assert_eq!(rows[0][5], Val::S("v2".to_string()));
    assert_approx_eq!(f64, rows[0][6].as_f64(), 0.75, epsilon = 1e-9);
    assert_approx_eq!(f64, rows[0][7].as_f64(), 0.5, epsilon = 1e-9);
    assert_eq!(rows[0][8].as_i64(), 3);
}

#[test]
fn ld_self_pair_is_perfect() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = LdOptions{
        variant1: Some("v2".to_string()),
        variant2: Some("v2".to_string()),
        ..LdOptions::default()
    };
    let bound = ld::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);
    assert_approx_eq!(f64, rows[0][6].as_f64(), 1.0, epsilon = 1e-12);
    assert_eq!(rows[0][8].as_i64(), 4);
}

#[test]
fn ld_windowed_same_chromosome() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let bound = ld::bind(&pgen, LdOptions::default()).unwrap();
    let rows = collect_rows(&bound);
    // Chrom 1 pairs: (v1,v2)=0.75, (v1,v3)=1.0, (v2,v3)=0.25; all pass 0.2.
    // v4 sits alone on chrom 2.
    assert_eq!(rows.len(), 3);
    let find = |a: &str, b: &str| {
        rows.iter()
            .find(|r| r[2].as_str() == a && r[5].as_str() == b)
            .unwrap_or_else(|| panic!("missing pair ({a}, {b})"))
    };
    assert_approx_eq!(f64, find("v1", "v2")[6].as_f64(), 0.75, epsilon = 1e-9);
    assert_approx_eq!(f64, find("v1", "v3")[6].as_f64(), 1.0, epsilon = 1e-9);
    assert_approx_eq!(f64, find("v2", "v3")[6].as_f64(), 0.25, epsilon = 1e-9);
    assert_approx_eq!(f64, find("v2", "v3")[7].as_f64(), 1.0 / 3.0, epsilon = 1e-9);
}

#[test]
fn ld_windowed_threshold_filters() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = LdOptions{r2_threshold: 0.5, ..LdOptions::default()};
    let bound = ld::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);
    assert_eq!(rows.len(), 2); // (v1,v2) and (v1,v3) survive.
}

#[test]
fn ld_zero_window_emits_no_same_chrom_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = LdOptions{window_kb: 0, ..LdOptions::default()};
    let bound = ld::bind(&pgen, options).unwrap();
    assert!(collect_rows(&bound).is_empty());
}

#[test]
fn ld_inter_chromosome_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = LdOptions{window_kb: 0, inter_chr: true, ..LdOptions::default()};
    let bound = ld::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);
    // Same-chrom windows are empty, so only cross-chrom pairs reaching the
    // threshold remain: (v1,v4)=0.75 and (v3,v4)=0.25; (v2,v4)~0.18 drops.
    let ids: Vec<(&str, &str)> = rows
        .iter()
        .map(|r| (r[2].as_str(), r[5].as_str()))
        .sorted()
        .collect();
    assert_eq!(ids, vec![("v1", "v4"), ("v3", "v4")]);
}

#[test]
fn score_positional_mean_imputation() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = ScoreOptions{
        weights: Some(WeightSpec::Positional(vec![0.5, -0.3, 1.2, 0.8])),
        ..ScoreOptions::default()
    };
    let bound = score::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);
    assert_eq!(rows.len(), 4);

    let expected = [("S1", 2.1), ("S2", 1.4), ("S3", 3.0), ("S4", 1.5)];
    for (row, (iid, score_sum)) in rows.iter().zip(expected) {
        assert_eq!(row[1].as_str(), iid);
        assert_eq!(row[2].as_i64(), 8);
        assert_eq!(row[3].as_i64(), 8);
        assert_approx_eq!(f64, row[5].as_f64(), score_sum, epsilon = 1e-9);
        assert_approx_eq!(f64, row[6].as_f64(), score_sum / 8.0, epsilon = 1e-9);
    }
}

#[test]
fn score_no_mean_imputation_skips_missing() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = ScoreOptions{
        weights: Some(WeightSpec::Positional(vec![0.5, -0.3, 1.2, 0.8])),
        no_mean_imputation: true,
        ..ScoreOptions::default()
    };
    let bound = score::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);

    let expected = [("S1", 2.1, 8), ("S2", 0.2, 6), ("S3", 3.0, 8), ("S4", 1.0, 6)];
    for (row, (iid, score_sum, allele_ct)) in rows.iter().zip(expected) {
        assert_eq!(row[1].as_str(), iid);
        assert_eq!(row[2].as_i64(), allele_ct);
        assert_approx_eq!(f64, row[5].as_f64(), score_sum, epsilon = 1e-9);
    }
}

#[test]
fn score_center_standardizes() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = ScoreOptions{
        weights: Some(WeightSpec::Positional(vec![1.0, 0.0, 0.0, 0.0])),
        center: true,
        ..ScoreOptions::default()
    };
    let bound = score::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);

    // Only v1 is scored: mean 1.0, sd = sqrt(0.5); S4's dosage is missing.
    let sd = 0.5f64.sqrt();
    let expected = [
        ("S1", -1.0 / sd, 2),
        ("S2", 0.0, 2),
        ("S3", 1.0 / sd, 2),
        ("S4", 0.0, 0),
    ];
    for (row, (iid, score_sum, allele_ct)) in rows.iter().zip(expected) {
        assert_eq!(row[1].as_str(), iid);
        assert_eq!(row[2].as_i64(), allele_ct);
        assert_approx_eq!(f64, row[5].as_f64(), score_sum, epsilon = 1e-9);
    }
    // allele_ct of zero falls back to a zero average.
    assert_approx_eq!(f64, rows[3][6].as_f64(), 0.0, epsilon = 0.0);
}

#[test]
fn score_keyed_weights_flip_and_skip() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let entries = vec![
        WeightEntry{id: "v1".to_string(), allele: "G".to_string(), weight: 0.5},
        // REF-keyed: contributions flip to 2 - alt.
        WeightEntry{id: "v2".to_string(), allele: "C".to_string(), weight: -0.3},
        WeightEntry{id: "v3".to_string(), allele: "A".to_string(), weight: 1.2},
        // Unknown id and mismatched allele both drop silently.
        WeightEntry{id: "v99".to_string(), allele: "A".to_string(), weight: 9.0},
        WeightEntry{id: "v4".to_string(), allele: "G".to_string(), weight: 9.0},
    ];
    let options = ScoreOptions{
        weights: Some(WeightSpec::Keyed(entries)),
        ..ScoreOptions::default()
    };
    let bound = score::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);

    let expected = [("S1", 2.1), ("S2", 1.4), ("S3", 1.6), ("S4", 0.5)];
    for (row, (iid, score_sum)) in rows.iter().zip(expected) {
        assert_eq!(row[1].as_str(), iid);
        assert_eq!(row[2].as_i64(), 6);
        assert_approx_eq!(f64, row[5].as_f64(), score_sum, epsilon = 1e-9);
    }
}

#[test]
fn score_is_invariant_under_weight_reordering() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let entries = vec![
        WeightEntry{id: "v1".to_string(), allele: "G".to_string(), weight: 0.5},
        WeightEntry{id: "v3".to_string(), allele: "A".to_string(), weight: 1.2},
        WeightEntry{id: "v4".to_string(), allele: "C".to_string(), weight: 0.8},
    ];
    let mut reversed = entries.clone();
    reversed.reverse();

    let run = |entries: Vec<WeightEntry>| {
        let options = ScoreOptions{
            weights: Some(WeightSpec::Keyed(entries)),
            no_mean_imputation: true,
            ..ScoreOptions::default()
        };
        collect_rows(&score::bind(&pgen, options).unwrap())
    };
    let forward = run(entries);
    let backward = run(reversed);
    for (a, b) in forward.iter().zip(&backward) {
        assert_approx_eq!(f64, a[5].as_f64(), b[5].as_f64(), epsilon = 1e-12);
        assert_eq!(a[2], b[2]);
    }
}

#[test]
fn score_subset_emits_sorted_sample_order() {
    let dir = tempfile::tempdir().unwrap();
    let pgen = fixture_a(dir.path());
    let options = ScoreOptions{
        common: CommonOptions{
            // Deliberately unsorted selector.
            samples: Some(SampleSelector::Ids(vec!["S4".to_string(), "S2".to_string()])),
            ..CommonOptions::default()
        },
        weights: Some(WeightSpec::Positional(vec![0.5, -0.3, 1.2, 0.8])),
        ..ScoreOptions::default()
    };
    let bound = score::bind(&pgen, options).unwrap();
    let rows = collect_rows(&bound);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][1].as_str(), "S2");
    assert_eq!(rows[1][1].as_str(), "S4");
}

// tests/regional_pca.rs

use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;

use regional_pca::{
    compute, MeasurementMatrix, RankMethod, Region, RegionMap, RegionMapBuilder, RegionSiteLink,
    RegionalPca, Site, SkipReason, Strand,
};

fn ids(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
}

fn map_of(entries: &[(&str, &str)]) -> RegionMap {
    entries
        .iter()
        .map(|(region, site)| RegionSiteLink::new(*region, *site))
        .collect()
}

fn unit_gaussian(rng: &mut ChaCha8Rng, len: usize) -> Array1<f64> {
    let normal = Normal::<f64>::new(0.0, 1.0).unwrap();
    let v = Array1::from_shape_fn(len, |_| rng.sample(normal));
    let norm = v.dot(&v).sqrt();
    v / norm
}

/// Gaussian noise plus a planted signal of the given strengths.
fn planted_panel(seed: u64, n_sites: usize, n_samples: usize, strengths: &[f64]) -> MeasurementMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::<f64>::new(0.0, 1.0).unwrap();
    let mut values = Array2::from_shape_fn((n_sites, n_samples), |_| rng.sample(normal));
    for &d in strengths {
        let u = unit_gaussian(&mut rng, n_sites);
        let v = unit_gaussian(&mut rng, n_samples);
        let u_col = u.insert_axis(Axis(1));
        let v_row = v.insert_axis(Axis(0));
        values = values + d * u_col.dot(&v_row);
    }
    MeasurementMatrix::new(ids("cg", n_sites), ids("S", n_samples), values).unwrap()
}

fn whole_panel_map(matrix: &MeasurementMatrix) -> RegionMap {
    matrix
        .site_ids()
        .iter()
        .map(|site| RegionSiteLink::new("R", site.clone()))
        .collect()
}

fn two_region_matrix() -> MeasurementMatrix {
    let values = Array2::from_shape_fn((10, 5), |(i, j)| {
        let trend = if i < 5 { j as f64 } else { (4 - j) as f64 };
        0.1 * trend * (1.0 + i as f64 / 10.0) + ((i * 7 + j * 3) % 5) as f64 / 50.0
    });
    MeasurementMatrix::new(ids("cg", 10), ids("S", 5), values).unwrap()
}

fn two_region_map() -> RegionMap {
    let mut entries = Vec::new();
    for i in 1..=10 {
        let region = if i <= 5 { "A" } else { "B" };
        entries.push(RegionSiteLink::new(region, format!("cg{}", i)));
    }
    RegionMap::new(entries)
}

#[test]
fn test_two_regions_end_to_end() {
    let matrix = two_region_matrix();
    let result = compute(&matrix, &two_region_map(), RankMethod::Gd).unwrap();

    assert_eq!(result.regional_components.ncols(), 5);
    assert_eq!(result.component_labels[0], "A-PC1");
    assert!(result.component_labels.iter().any(|label| label == "B-PC1"));
    assert!(result.skipped_regions.is_empty());
    assert_eq!(result.sample_ids, matrix.sample_ids());

    let total_k: usize = result.component_counts().iter().map(|(_, k)| k).sum();
    assert_eq!(total_k, result.n_components());
    for (region, k) in result.component_counts() {
        assert!((1..=4).contains(&k), "region {} kept {} components", region, k);
    }
    assert_eq!(result.loadings("A").unwrap().ncols(), 5);
}

#[test]
fn test_loadings_orthonormal_and_scores_match_projection() {
    let matrix = two_region_matrix();
    let result = compute(&matrix, &two_region_map(), RankMethod::Mp).unwrap();

    for region in &result.regions {
        let gram = region.loadings.dot(&region.loadings.t());
        for i in 0..region.k {
            for j in 0..region.k {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(gram[[i, j]], expected, epsilon = 1e-9);
            }
        }
        for (i, score_row) in region.scores.rows().into_iter().enumerate() {
            let energy = score_row.dot(&score_row).sqrt();
            assert_abs_diff_eq!(energy, region.singular_values[i], epsilon = 1e-9);
            assert_abs_diff_eq!(score_row.sum(), 0.0, epsilon = 1e-9);
        }
    }
}

#[test]
fn test_recovers_planted_rank() {
    let matrix = planted_panel(7, 40, 100, &[120.0, 90.0, 60.0]);
    let map = whole_panel_map(&matrix);

    let gd = compute(&matrix, &map, RankMethod::Gd).unwrap();
    let mp = compute(&matrix, &map, RankMethod::Mp).unwrap();

    assert_eq!(gd.region("R").unwrap().k, 3);
    assert!(mp.region("R").unwrap().k >= gd.region("R").unwrap().k);
    assert_eq!(gd.regional_components.dim(), (3, 100));
    assert!(gd.region("R").unwrap().percent_variance[0] > 40.0);
}

#[test]
fn test_rank_grows_with_signal_strength() {
    let ks: Vec<usize> = [0.0, 0.2, 1.0]
        .iter()
        .map(|scale| {
            let strengths: Vec<f64> = [120.0, 90.0, 60.0].iter().map(|d| d * scale).collect();
            let matrix = planted_panel(11, 40, 100, &strengths);
            let result = compute(&matrix, &whole_panel_map(&matrix), RankMethod::Gd).unwrap();
            result.region("R").unwrap().k
        })
        .collect();

    assert_eq!(ks[0], 1);
    assert!(ks[0] <= ks[1] && ks[1] <= ks[2], "ranks {:?}", ks);
    assert_eq!(ks[2], 3);
}

#[test]
fn test_repeated_runs_are_identical() {
    let matrix = planted_panel(3, 25, 30, &[40.0, 20.0]);
    let mut entries = Vec::new();
    for (i, site) in matrix.site_ids().iter().enumerate() {
        entries.push(RegionSiteLink::new(format!("R{}", i % 4), site.clone()));
    }
    let map = RegionMap::new(entries);

    let pca = RegionalPca::builder().method(RankMethod::Mp).build();
    let first = pca.compute(&matrix, &map).unwrap();
    let second = pca.compute(&matrix, &map).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.component_labels.first().map(String::as_str),
        Some("R0-PC1")
    );
}

#[test]
fn test_region_without_matrix_sites_is_reported() {
    let matrix = two_region_matrix();
    let map = map_of(&[
        ("A", "cg1"),
        ("A", "cg2"),
        ("GHOST", "cg_absent"),
        ("B", "cg6"),
    ]);
    let result = compute(&matrix, &map, RankMethod::Gd).unwrap();

    assert_eq!(result.skipped_regions.len(), 1);
    assert_eq!(result.skipped_regions[0].region_id, "GHOST");
    assert_eq!(result.skipped_regions[0].reason, SkipReason::NoSitesInMatrix);
    assert!(result.region("GHOST").is_none());
    assert!(!result.component_labels.iter().any(|l| l.starts_with("GHOST")));
    assert_eq!(result.dropped_site_links, 1);
    assert_eq!(result.summary().skipped_by_reason.get("no_sites_in_matrix"), Some(&1));
}

#[test]
fn test_single_site_region_passes_row_through() {
    let matrix = two_region_matrix();
    let map = map_of(&[("SOLO", "cg3")]);
    let result = compute(&matrix, &map, RankMethod::Gd).unwrap();

    let solo = result.region("SOLO").unwrap();
    assert_eq!(solo.k, 1);
    assert!(solo.rank.degenerate);
    assert_eq!(solo.loadings, Array2::ones((1, 1)));
    assert_eq!(result.regional_components.row(0), matrix.row(2));
    assert_eq!(result.summary().n_single_site_regions, 1);
}

#[test]
fn test_constant_region_keeps_one_component() {
    let values = Array2::from_elem((4, 6), 0.5);
    let matrix = MeasurementMatrix::new(ids("cg", 4), ids("S", 6), values).unwrap();
    let map = map_of(&[("FLAT", "cg1"), ("FLAT", "cg2"), ("FLAT", "cg3"), ("FLAT", "cg4")]);
    let result = compute(&matrix, &map, RankMethod::Gd).unwrap();

    let flat = result.region("FLAT").unwrap();
    assert_eq!(flat.k, 1);
    for value in result.regional_components.iter() {
        assert_abs_diff_eq!(*value, 0.0, epsilon = 1e-12);
    }
}

#[test]
fn test_infinite_values_skip_only_their_region() {
    let mut values = two_region_matrix().values().to_owned();
    values[[7, 2]] = f64::INFINITY;
    let matrix = MeasurementMatrix::new(ids("cg", 10), ids("S", 5), values).unwrap();
    let result = compute(&matrix, &two_region_map(), RankMethod::Gd).unwrap();

    assert!(result.region("A").is_some());
    assert!(result.region("B").is_none());
    assert_eq!(result.skipped_regions.len(), 1);
    assert_eq!(result.skipped_regions[0].reason, SkipReason::NonFiniteValues);
}

#[test]
fn test_map_built_from_positions() {
    let sites = vec![
        Site::point("cg1", "chr1", 100),
        Site::point("cg2", "chr1", 150),
        Site::point("cg3", "chr1", 900),
        Site::point("cg4", "chr2", 120),
    ];
    let regions = vec![
        Region::new("PROM", "chr1", 90, 200, Strand::Forward),
        Region::new("BODY", "chr1", 140, 1000, Strand::None),
    ];
    let map = RegionMapBuilder::new(false).build(&sites, &regions).unwrap();
    let pairs: Vec<(&str, &str)> = map
        .iter()
        .map(|l| (l.region_id.as_str(), l.site_id.as_str()))
        .collect();
    assert_eq!(
        pairs,
        vec![("PROM", "cg1"), ("PROM", "cg2"), ("BODY", "cg2"), ("BODY", "cg3")]
    );

    let values = Array2::from_shape_fn((4, 6), |(i, j)| ((i + 1) * (j + 2) % 7) as f64);
    let matrix = MeasurementMatrix::new(ids("cg", 4), ids("S", 6), values).unwrap();
    let result = compute(&matrix, &map, RankMethod::Gd).unwrap();
    assert_eq!(result.component_labels, vec!["PROM-PC1", "BODY-PC1"]);
    assert_eq!(result.region("BODY").unwrap().site_ids, vec!["cg2", "cg3"]);
}

#[test]
fn test_empty_region_map_yields_no_components() {
    let matrix = two_region_matrix();
    let result = compute(&matrix, &RegionMap::default(), RankMethod::Gd).unwrap();
    assert_eq!(result.regional_components.dim(), (0, 5));
    assert!(result.skipped_regions.is_empty());
}

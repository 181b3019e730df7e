// main.rs

// --- External Crate Imports ---
use anyhow::{anyhow, Context, Error, Result};
use clap::Parser;
use log::{debug, info, warn};
use regional_pca::{tables, RegionMap, RegionMapBuilder, RegionalPca};
use std::{
    fs::File,
    io::{BufWriter, Write},
    time::Instant,
};

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting regional_pca with args: {:?}", cli_args);

    // Configure Rayon thread pool
    let num_threads = cli_args.threads.unwrap_or_else(num_cpus::get);
    info!("Using {} threads for parallel operations.", num_threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;

    // --- 1. Load Measurements ---
    let matrix = tables::read_measurement_matrix(&cli_args.matrix).with_context(|| {
        format!("Failed to load measurement matrix {}", cli_args.matrix.display())
    })?;

    // --- 2. Region Map: read directly or built from positions ---
    let (region_map, built_from_positions) = match (&cli_args.region_map, &cli_args.regions) {
        (Some(map_path), _) => {
            if cli_args.sites.is_some() {
                warn!("--sites is ignored when --region-map is given.");
            }
            let region_map = tables::read_region_map(map_path).with_context(|| {
                format!("Failed to load region map {}", map_path.display())
            })?;
            (region_map, false)
        }
        (None, Some(regions_path)) => {
            let regions = tables::read_regions(regions_path).with_context(|| {
                format!("Failed to load region positions {}", regions_path.display())
            })?;
            let sites = match &cli_args.sites {
                Some(sites_path) => tables::read_sites(sites_path).with_context(|| {
                    format!("Failed to load site positions {}", sites_path.display())
                })?,
                None => {
                    info!("No --sites table given; parsing site positions from matrix row keys.");
                    tables::sites_from_matrix_keys(&matrix)
                        .context("Matrix row keys are not chrom_start_end[_name] site keys; pass --sites")?
                }
            };
            let region_map = RegionMapBuilder::new(cli_args.strand_aware)
                .build(&sites, &regions)
                .context("Failed to build region map")?;
            (region_map, true)
        }
        (None, None) => {
            return Err(anyhow!("One of --region-map or --regions is required."));
        }
    };
    debug!(
        "Region map ready: {} links, first regions: {:?}",
        region_map.len(),
        region_map.region_ids().iter().take(5).collect::<Vec<_>>()
    );

    // --- 3. Regional PCA ---
    let result = RegionalPca::builder()
        .method(cli_args.method)
        .show_progress(!cli_args.no_progress)
        .build()
        .compute(&matrix, &region_map)?;

    if result.dropped_site_links > 0 {
        warn!(
            "{} region map entries name sites absent from the matrix and were dropped.",
            result.dropped_site_links
        );
    }
    for skipped in &result.skipped_regions {
        debug!("Skipped region {}: {}", skipped.region_id, skipped.reason);
    }

    // --- 4. Write Outputs ---
    output_writer::write_regional_components(&cli_args.output_prefix, &result)?;
    output_writer::write_loadings(&cli_args.output_prefix, &result)?;
    output_writer::write_component_summary(&cli_args.output_prefix, &result)?;
    output_writer::write_skipped_regions(&cli_args.output_prefix, &result)?;
    output_writer::write_run_summary(&cli_args.output_prefix, &result)?;
    if built_from_positions {
        output_writer::write_region_map(&cli_args.output_prefix, &region_map)?;
    }

    info!(
        "regional_pca finished successfully in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}

// --- Module Implementations ---

mod cli {
    use clap::Parser;
    use regional_pca::RankMethod;
    use std::path::PathBuf;

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Regional PCA of DNA methylation over annotation regions.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        /// Sites x samples table; first column holds site ids.
        #[arg(short = 'm', long, required = true)]
        pub(crate) matrix: PathBuf,

        /// Precomputed region_id / site_id table.
        #[arg(long = "region-map", conflicts_with = "regions")]
        pub(crate) region_map: Option<PathBuf>,

        /// Region positions (id, chrom, start, end, optional strand).
        #[arg(short = 'r', long)]
        pub(crate) regions: Option<PathBuf>,

        /// Site positions; defaults to parsing the matrix row keys.
        #[arg(short = 's', long)]
        pub(crate) sites: Option<PathBuf>,

        #[arg(long)]
        pub(crate) strand_aware: bool,

        /// Rank selection: gd (Gavish-Donoho) or mp (Marcenko-Pastur).
        #[arg(long, default_value = "gd")]
        pub(crate) method: RankMethod,

        #[arg(short, long = "out", required = true)]
        pub(crate) output_prefix: String,

        #[arg(short = 't', long)]
        pub(crate) threads: Option<usize>,

        #[arg(long, default_value = "Info")]
        pub(crate) log_level: String,

        #[arg(long)]
        pub(crate) no_progress: bool,
    }

}

mod output_writer {
    use super::{anyhow, info, BufWriter, File, RegionMap, Result, Write};
    use regional_pca::RegionalPcaResult;

    fn create_output_file(prefix: &str, suffix: &str) -> Result<BufWriter<File>> {
        let filename = format!("{}.{}", prefix, suffix);
        File::create(&filename)
            .map(BufWriter::new)
            .map_err(|e| anyhow!("Failed to create output file {}: {}", filename, e))
    }

    pub(crate) fn write_regional_components(
        output_prefix: &str,
        result: &RegionalPcaResult,
    ) -> Result<()> {
        let mut writer = create_output_file(output_prefix, "regional_pcs.tsv")?;
        info!(
            "Writing {} regional components to {}.regional_pcs.tsv",
            result.n_components(),
            output_prefix
        );

        write!(writer, "component")?;
        for sample_name in &result.sample_ids {
            write!(writer, "\t{}", sample_name)?;
        }
        writeln!(writer)?;

        for (label, row) in result
            .component_labels
            .iter()
            .zip(result.regional_components.rows())
        {
            write!(writer, "{}", label)?;
            for value in row.iter() {
                write!(writer, "\t{:.6}", value)?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub(crate) fn write_loadings(output_prefix: &str, result: &RegionalPcaResult) -> Result<()> {
        let mut writer = create_output_file(output_prefix, "loadings.tsv")?;
        info!("Writing site loadings to {}.loadings.tsv", output_prefix);

        writeln!(writer, "region_id\tcomponent\tsite_id\tloading")?;
        for region in &result.regions {
            for (label, loading_row) in region
                .component_labels()
                .iter()
                .zip(region.loadings.rows())
            {
                for (site_id, loading) in region.site_ids.iter().zip(loading_row.iter()) {
                    writeln!(
                        writer,
                        "{}\t{}\t{}\t{:.6}",
                        region.region_id, label, site_id, loading
                    )?;
                }
            }
        }
        writer.flush()?;
        Ok(())
    }

    pub(crate) fn write_component_summary(
        output_prefix: &str,
        result: &RegionalPcaResult,
    ) -> Result<()> {
        let mut writer = create_output_file(output_prefix, "components.tsv")?;
        info!("Writing per-region components to {}.components.tsv", output_prefix);

        writeln!(
            writer,
            "region_id\tn_sites\tk\tthreshold\taspect_ratio\tsingular_values\tpercent_variance"
        )?;
        for region in &result.regions {
            let singular_values: Vec<String> = region
                .singular_values
                .iter()
                .take(region.k)
                .map(|s| format!("{:.6}", s))
                .collect();
            let percent_variance: Vec<String> = region
                .percent_variance
                .iter()
                .map(|p| format!("{:.6}", p))
                .collect();
            writeln!(
                writer,
                "{}\t{}\t{}\t{:.6}\t{:.6}\t{}\t{}",
                region.region_id,
                region.n_sites(),
                region.k,
                region.rank.threshold,
                region.rank.aspect_ratio,
                singular_values.join(","),
                percent_variance.join(",")
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    pub(crate) fn write_skipped_regions(
        output_prefix: &str,
        result: &RegionalPcaResult,
    ) -> Result<()> {
        let mut writer = create_output_file(output_prefix, "skipped.tsv")?;
        info!(
            "Writing {} skipped regions to {}.skipped.tsv",
            result.skipped_regions.len(),
            output_prefix
        );

        writeln!(writer, "region_id\treason")?;
        for skipped in &result.skipped_regions {
            writeln!(writer, "{}\t{}", skipped.region_id, skipped.reason)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub(crate) fn write_run_summary(output_prefix: &str, result: &RegionalPcaResult) -> Result<()> {
        let mut writer = create_output_file(output_prefix, "summary.json")?;
        info!("Writing run summary to {}.summary.json", output_prefix);
        serde_json::to_writer_pretty(&mut writer, &result.summary())?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    pub(crate) fn write_region_map(output_prefix: &str, region_map: &RegionMap) -> Result<()> {
        let mut writer = create_output_file(output_prefix, "region_map.tsv")?;
        info!(
            "Writing {} region map entries to {}.region_map.tsv",
            region_map.len(),
            output_prefix
        );

        writeln!(writer, "region_id\tsite_id")?;
        for link in region_map {
            writeln!(writer, "{}\t{}", link.region_id, link.site_id)?;
        }
        writer.flush()?;
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use ndarray::array;
        use regional_pca::{compute, MeasurementMatrix, RankMethod, RegionSiteLink};
        use std::fs;
        use tempfile::tempdir;

        fn small_result() -> RegionalPcaResult {
            let matrix = MeasurementMatrix::new(
                vec!["cg1".to_string(), "cg2".to_string(), "cg3".to_string()],
                vec!["S1".to_string(), "S2".to_string(), "S3".to_string()],
                array![[0.1, 0.5, 0.9], [0.2, 0.4, 0.8], [0.3, 0.3, 0.3]],
            )
            .unwrap();
            let map = RegionMap::new(vec![
                RegionSiteLink::new("A", "cg1"),
                RegionSiteLink::new("A", "cg2"),
                RegionSiteLink::new("B", "cg3"),
                RegionSiteLink::new("C", "cg_missing"),
            ]);
            compute(&matrix, &map, RankMethod::Gd).unwrap()
        }

        #[test]
        fn test_writes_all_tables() {
            let dir = tempdir().unwrap();
            let prefix = dir.path().join("run").display().to_string();
            let result = small_result();

            write_regional_components(&prefix, &result).unwrap();
            write_loadings(&prefix, &result).unwrap();
            write_component_summary(&prefix, &result).unwrap();
            write_skipped_regions(&prefix, &result).unwrap();
            write_run_summary(&prefix, &result).unwrap();

            let pcs = fs::read_to_string(format!("{}.regional_pcs.tsv", prefix)).unwrap();
            let mut lines = pcs.lines();
            assert_eq!(lines.next(), Some("component\tS1\tS2\tS3"));
            assert!(lines.next().unwrap().starts_with("A-PC1\t"));
            assert_eq!(lines.next(), Some("B-PC1\t0.300000\t0.300000\t0.300000"));

            let skipped = fs::read_to_string(format!("{}.skipped.tsv", prefix)).unwrap();
            assert!(skipped.contains("C\tno_sites_in_matrix"));

            let summary: serde_json::Value = serde_json::from_str(
                &fs::read_to_string(format!("{}.summary.json", prefix)).unwrap(),
            )
            .unwrap();
            assert_eq!(summary["method"], "gd");
            assert_eq!(summary["n_skipped_regions"], 1);
            assert_eq!(summary["dropped_site_links"], 1);
        }

        #[test]
        fn test_empty_tables_still_written_with_headers() {
            let dir = tempdir().unwrap();
            let prefix = dir.path().join("empty").display().to_string();
            for suffix in ["loadings.tsv", "components.tsv", "skipped.tsv"] {
                fs::write(format!("{}.{}", prefix, suffix), "stale\n").unwrap();
            }

            let matrix = MeasurementMatrix::new(
                vec!["cg1".to_string()],
                vec!["S1".to_string(), "S2".to_string()],
                array![[0.1, 0.2]],
            )
            .unwrap();
            let result = compute(&matrix, &RegionMap::default(), RankMethod::Gd).unwrap();

            write_loadings(&prefix, &result).unwrap();
            write_component_summary(&prefix, &result).unwrap();
            write_skipped_regions(&prefix, &result).unwrap();

            let read = |suffix: &str| fs::read_to_string(format!("{}.{}", prefix, suffix)).unwrap();
            assert_eq!(read("loadings.tsv"), "region_id\tcomponent\tsite_id\tloading\n");
            assert_eq!(
                read("components.tsv"),
                "region_id\tn_sites\tk\tthreshold\taspect_ratio\tsingular_values\tpercent_variance\n"
            );
            assert_eq!(read("skipped.tsv"), "region_id\treason\n");
        }

        #[test]
        fn test_region_map_export() {
            let dir = tempdir().unwrap();
            let prefix = dir.path().join("map").display().to_string();
            let map = RegionMap::new(vec![RegionSiteLink::new("G1", "cg1")]);
            write_region_map(&prefix, &map).unwrap();
            let text = fs::read_to_string(format!("{}.region_map.tsv", prefix)).unwrap();
            assert_eq!(text, "region_id\tsite_id\nG1\tcg1\n");
        }
    }
}

extern crate log;
pub mod buffer;
pub mod crs;
pub mod geofile;
pub mod pipeline;

use crate::buffer::params::{BufferParams, CapStyle, Distance, JoinStyle};
use crate::crs::resolve::resolve_crs_fallbacks;
use crate::crs::transform::crs_to_wkt;
use crate::geofile::gdal_geofile::{
    geometry_type_from_name, read_feature, GeofileSink, GeofileSource,
};
use crate::pipeline::dispatch::dispatch;
use crate::pipeline::task::TaskBuilder;
use anyhow::anyhow;
use clap::Parser;
use gdal::vector::LayerAccess;
use indicatif::ProgressBar;
use std::path::PathBuf;

/// Buffer geometries from a vector dataset into a new dataset.
///
/// Geometries can be dilated with a positive distance, eroded with a negative
/// distance, and in some cases cleaned or repaired with a distance of 0. The
/// distance is interpreted in the units of the CRS the buffer runs in.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input vector dataset.
    infile: PathBuf,

    /// Path to the output vector dataset.
    outfile: PathBuf,

    /// Output driver name. Defaults to the driver of the input dataset.
    #[arg(long)]
    driver: Option<String>,

    /// Where geometries terminate, use this style.
    #[arg(long, value_enum, default_value = "round")]
    cap_style: CapStyle,

    /// Where geometries touch, use this style.
    #[arg(long, value_enum, default_value = "round")]
    join_style: JoinStyle,

    /// Number of segments per quarter circle around each vertex.
    #[arg(long, default_value_t = 16)]
    res: u32,

    /// When using a mitre join, limit the length of the join corner
    /// according to this ratio.
    #[arg(long, default_value_t = 5.0, value_parser = parse_mitre_limit)]
    mitre_limit: f64,

    /// Buffer distance, or the name of a field holding per-feature distances.
    #[arg(long, allow_negative_numbers = true)]
    distance: Distance,

    /// CRS of the input data. Not needed if set in the input file.
    #[arg(long)]
    src_crs: Option<String>,

    /// Perform buffer operations in a different CRS. Defaults to the source
    /// CRS.
    #[arg(long)]
    buf_crs: Option<String>,

    /// Reproject geometries to a different CRS before writing. Must be
    /// combined with --buf-crs. Defaults to the source CRS.
    #[arg(long)]
    dst_crs: Option<String>,

    /// Geometry type declared in the output schema.
    #[arg(long, default_value = "MultiPolygon")]
    geom_type: String,

    /// Skip features that fail somewhere in the processing pipeline.
    #[arg(long)]
    skip_failures: bool,

    /// Process features in parallel across N cores. Speed is the goal here,
    /// so feature order is not preserved above one core.
    #[arg(long, default_value_t = 1, value_parser = parse_jobs)]
    jobs: usize,
}

fn parse_mitre_limit(value: &str) -> Result<f64, String> {
    let limit: f64 = value.parse().map_err(|_| "must be a number".to_string())?;
    if limit <= 0.0 {
        return Err("must be a positive value".to_string());
    }
    Ok(limit)
}

fn parse_jobs(value: &str) -> Result<usize, String> {
    let cores = std::thread::available_parallelism()
        .map(|cores| cores.get())
        .unwrap_or(1);
    let jobs: usize = value.parse().map_err(|_| "must be an integer".to_string())?;
    if jobs < 1 || jobs > cores {
        return Err(format!("must be between 1 and {}", cores));
    }
    Ok(jobs)
}

/// Checks that must pass before any file is touched.
fn validate_args(args: &Args) -> anyhow::Result<()> {
    if args.dst_crs.is_some() && args.buf_crs.is_none() {
        return Err(anyhow!("Must specify --buf-crs when using --dst-crs."));
    }
    Ok(())
}

fn run(args: Args) -> anyhow::Result<()> {
    validate_args(&args)?;

    let source = GeofileSource::open(&args.infile)?;
    let crs = resolve_crs_fallbacks(
        args.src_crs.as_deref(),
        args.buf_crs.as_deref(),
        args.dst_crs.as_deref(),
        source.metadata.crs_wkt.as_deref(),
    )?;

    let driver = args
        .driver
        .unwrap_or_else(|| source.metadata.driver.clone());
    let geometry_type = geometry_type_from_name(&args.geom_type)?;
    let destination_wkt = crs_to_wkt(&crs.destination)?;
    log::debug!(
        "Creating output dataset {:?} with driver {}",
        args.outfile,
        driver
    );
    let sink = GeofileSink::create(
        &args.outfile,
        &driver,
        &destination_wkt,
        geometry_type,
        &source.metadata.fields,
    )?;

    let params = BufferParams {
        distance: args.distance,
        resolution: args.res,
        cap_style: args.cap_style,
        join_style: args.join_style,
        mitre_limit: args.mitre_limit,
    };
    let builder = TaskBuilder::new(crs, params, args.skip_failures);

    let bar = ProgressBar::new(source.metadata.feature_count);
    let mut layer = source.layer()?;
    let tasks = layer
        .features()
        .map(|gdal_feature| read_feature(&gdal_feature).map(|feature| builder.build(feature)));

    log::debug!("Starting processing on {} cores", args.jobs);
    dispatch(tasks, args.jobs, args.skip_failures, |feature| {
        sink.write(&feature)?;
        bar.inc(1);
        Ok(())
    })?;
    bar.finish_and_clear();
    sink.finish()?;
    log::debug!("Finished processing.");
    Ok(())
}

fn try_main() -> anyhow::Result<()> {
    let args = Args::try_parse()?;
    run(args)
}

fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    env_logger::init();
    if let Err(e) = try_main() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1)
    }
}

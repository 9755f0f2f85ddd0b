use anyhow::Context;

use super::task::FeatureTask;
use crate::buffer::ops::buffer_geometry;
use crate::buffer::params::BufferParams;
use crate::crs::transform::transform_geometry;
use crate::geofile::feature::Feature;

/// Process a single feature: resolve its buffer distance, reproject into the
/// buffer CRS, buffer, reproject into the destination CRS, and return the
/// feature with its geometry replaced. All other fields pass through
/// unchanged.
///
/// A null distance field is not a failure: the feature passes through with
/// its geometry untouched. Any real failure is caught here, at the feature
/// boundary; with skip-failures it is logged and the feature is dropped
/// (`Ok(None)`), without it the error propagates and aborts the run.
pub fn process_feature(task: FeatureTask) -> anyhow::Result<Option<Feature>> {
    let FeatureTask {
        mut feature,
        src_crs,
        buf_crs,
        dst_crs,
        skip_failures,
        params,
    } = task;
    match buffered_geometry(&feature, &src_crs, &buf_crs, &dst_crs, &params) {
        Ok(Some(geometry)) => {
            feature.geometry = geometry;
            Ok(Some(feature))
        }
        Ok(None) => Ok(Some(feature)),
        Err(err) => {
            log::error!("Feature with ID {:?} failed: {:#}", feature.fid, err);
            if skip_failures {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

fn buffered_geometry(
    feature: &Feature,
    src_crs: &str,
    buf_crs: &str,
    dst_crs: &str,
    params: &BufferParams,
) -> anyhow::Result<Option<geo::Geometry>> {
    let distance = match params.distance.resolve(feature)? {
        Some(distance) => distance,
        None => return Ok(None),
    };
    let reprojected = transform_geometry(src_crs, buf_crs, &feature.geometry)
        .context("Reprojecting into the buffer CRS")?;
    let buffered = buffer_geometry(&reprojected, distance, params)?;
    let geometry = transform_geometry(buf_crs, dst_crs, &buffered)
        .context("Reprojecting into the destination CRS")?;
    Ok(Some(geometry))
}

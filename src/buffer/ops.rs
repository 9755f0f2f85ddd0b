use anyhow::Context;
use geos::Geom;

use super::params::{BufferParams, CapStyle, JoinStyle};

impl From<CapStyle> for geos::CapStyle {
    fn from(value: CapStyle) -> Self {
        match value {
            CapStyle::Flat => geos::CapStyle::Flat,
            CapStyle::Round => geos::CapStyle::Round,
            CapStyle::Square => geos::CapStyle::Square,
        }
    }
}

impl From<JoinStyle> for geos::JoinStyle {
    fn from(value: JoinStyle) -> Self {
        match value {
            JoinStyle::Round => geos::JoinStyle::Round,
            JoinStyle::Mitre => geos::JoinStyle::Mitre,
            JoinStyle::Bevel => geos::JoinStyle::Bevel,
        }
    }
}

/// Buffer a geometry by the given distance. A positive distance dilates, a
/// negative distance erodes, and a distance of 0 can clean or repair some
/// inputs. The distance is interpreted in the units of the geometry's CRS.
pub fn buffer_geometry(
    geometry: &geo::Geometry,
    distance: f64,
    params: &BufferParams,
) -> anyhow::Result<geo::Geometry> {
    let geos_geometry =
        geos::Geometry::try_from(geometry).context("Converting geometry to GEOS")?;
    let buffer_params = geos::BufferParams::builder()
        .end_cap_style(params.cap_style.into())
        .join_style(params.join_style.into())
        .quadrant_segments(params.resolution as i32)
        .mitre_limit(params.mitre_limit)
        .build()
        .context("Building GEOS buffer parameters")?;
    let buffered = geos_geometry
        .buffer_with_params(distance, &buffer_params)
        .context("Buffering geometry")?;
    geo::Geometry::try_from(&buffered).context("Converting geometry from GEOS")
}

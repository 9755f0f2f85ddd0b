use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr::{null, null_mut};

use anyhow::anyhow;

/// Owned OGR spatial reference created from user input (an authority code
/// like "EPSG:3857", WKT, or a PROJ string), pinned to x=lon, y=lat axis
/// order regardless of what the authority defines.
struct SpatialRefHandle(gdal_sys::OGRSpatialReferenceH);

impl SpatialRefHandle {
    fn from_user_input(definition: &str) -> anyhow::Result<Self> {
        let c_definition = CString::new(definition)?;
        unsafe {
            let handle = gdal_sys::OSRNewSpatialReference(null());
            if gdal_sys::OSRSetFromUserInput(handle, c_definition.as_ptr())
                != gdal_sys::OGRErr::OGRERR_NONE
            {
                gdal_sys::OSRDestroySpatialReference(handle);
                return Err(anyhow!(
                    "Could not interpret CRS definition '{}'",
                    definition
                ));
            }
            gdal_sys::OSRSetAxisMappingStrategy(
                handle,
                gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
            );
            Ok(Self(handle))
        }
    }
}

impl Drop for SpatialRefHandle {
    fn drop(&mut self) {
        unsafe { gdal_sys::OSRDestroySpatialReference(self.0) };
    }
}

/// OGR geometry transformer configured to cut geometries at the antimeridian
/// instead of letting them wrap around after reprojection. The coordinate
/// transformation must stay alive as long as the transformer.
struct GeomTransformer {
    transformer: gdal_sys::OGRGeomTransformerH,
    transform: gdal_sys::OGRCoordinateTransformationH,
}

impl GeomTransformer {
    fn new(src: &SpatialRefHandle, dst: &SpatialRefHandle) -> anyhow::Result<Self> {
        unsafe {
            let transform = gdal_sys::OCTNewCoordinateTransformation(src.0, dst.0);
            if transform.is_null() {
                return Err(anyhow!(
                    "No coordinate transformation available between the given CRS pair"
                ));
            }
            let wrap_dateline = CString::new("WRAPDATELINE=YES").unwrap();
            let options = gdal_sys::CSLAddString(null_mut(), wrap_dateline.as_ptr());
            let transformer = gdal_sys::OGR_GeomTransformer_Create(transform, options);
            gdal_sys::CSLDestroy(options);
            if transformer.is_null() {
                gdal_sys::OCTDestroyCoordinateTransformation(transform);
                return Err(anyhow!("Could not create the geometry transformer"));
            }
            Ok(Self {
                transformer,
                transform,
            })
        }
    }
}

impl Drop for GeomTransformer {
    fn drop(&mut self) {
        unsafe {
            gdal_sys::OGR_GeomTransformer_Destroy(self.transformer);
            gdal_sys::OCTDestroyCoordinateTransformation(self.transform);
        }
    }
}

/// Reproject a geometry between two coordinate reference systems.
///
/// Geometries crossing the antimeridian are cut into multi-part geometries
/// rather than wrapping around. The CRS definitions are anything OGR
/// understands: authority codes, WKT, or PROJ strings.
pub fn transform_geometry(
    src_crs: &str,
    dst_crs: &str,
    geometry: &geo::Geometry,
) -> anyhow::Result<geo::Geometry> {
    let src = SpatialRefHandle::from_user_input(src_crs)?;
    let dst = SpatialRefHandle::from_user_input(dst_crs)?;
    let transformer = GeomTransformer::new(&src, &dst)?;

    let wkb_bytes = wkb::geom_to_wkb(geometry)
        .or_else(|err| Err(anyhow!("Could not write geometry to WKB, {:?}", err)))?;
    let gdal_geometry = gdal::vector::Geometry::from_wkb(&wkb_bytes)?;
    let transformed = unsafe {
        let handle = gdal_sys::OGR_GeomTransformer_Transform(
            transformer.transformer,
            gdal_geometry.c_geometry(),
        );
        if handle.is_null() {
            return Err(anyhow!(
                "Could not transform geometry from '{}' to '{}'",
                src_crs,
                dst_crs
            ));
        }
        gdal::vector::Geometry::from_c_geometry(handle)
    };
    let transformed_wkb = transformed.wkb()?;
    wkb::wkb_to_geom(&mut transformed_wkb.as_slice())
        .or_else(|err| Err(anyhow!("Could not read geometry from WKB, {:?}", err)))
}

/// Normalize a user-supplied CRS definition to WKT.
pub fn crs_to_wkt(definition: &str) -> anyhow::Result<String> {
    let spatial_ref = SpatialRefHandle::from_user_input(definition)?;
    unsafe {
        let mut c_wkt: *mut c_char = null_mut();
        let rv = gdal_sys::OSRExportToWkt(spatial_ref.0, &mut c_wkt);
        if rv != gdal_sys::OGRErr::OGRERR_NONE || c_wkt.is_null() {
            return Err(anyhow!("Could not export CRS '{}' to WKT", definition));
        }
        let wkt = CStr::from_ptr(c_wkt).to_string_lossy().into_owned();
        gdal_sys::VSIFree(c_wkt as *mut std::ffi::c_void);
        Ok(wkt)
    }
}

use anyhow::{anyhow, Context};
use gdal::vector::LayerAccess;
use std::ffi::CStr;
use std::path::Path;
use std::ptr::null_mut;

use super::feature::{Feature, FieldValue};

/// Metadata captured from the input dataset before any feature is processed.
/// The output dataset is derived from this by overriding the driver, the CRS
/// and the declared geometry type.
#[derive(Debug, Clone)]
pub struct SourceMetadata {
    pub driver: String,
    pub crs_wkt: Option<String>,
    pub fields: Vec<(String, gdal::vector::OGRFieldType::Type)>,
    pub feature_count: u64,
}

pub struct GeofileSource {
    pub dataset: gdal::Dataset,
    pub metadata: SourceMetadata,
}

impl GeofileSource {
    pub fn open(filepath: &Path) -> anyhow::Result<Self> {
        gdal::DriverManager::register_all();
        let mut open_options = gdal::DatasetOptions::default();
        open_options.open_flags = gdal::GdalOpenFlags::GDAL_OF_VECTOR;
        let dataset = gdal::Dataset::open_ex(filepath, open_options)
            .with_context(|| format!("Opening input dataset {:?}", filepath))?;

        let layer_count = dataset.layer_count();
        if 0 == layer_count || 1 < layer_count {
            return Err(anyhow!(
                "Found {} layers, only one layer is supported.",
                layer_count
            ));
        }
        let driver = dataset.driver().short_name();
        let metadata = {
            let layer = dataset.layer(0)?;
            SourceMetadata {
                driver,
                crs_wkt: layer_crs_wkt(&layer)?,
                fields: scalar_field_definitions(&layer),
                feature_count: layer.feature_count(),
            }
        };
        Ok(Self { dataset, metadata })
    }

    pub fn layer(&self) -> anyhow::Result<gdal::vector::Layer> {
        self.dataset.layer(0).context("Getting input layer")
    }
}

/// The layer CRS as WKT, or None if the layer does not declare one.
fn layer_crs_wkt(layer: &gdal::vector::Layer) -> anyhow::Result<Option<String>> {
    unsafe {
        // The returned handle is owned by the layer and must not be destroyed.
        let spatial_ref = gdal_sys::OGR_L_GetSpatialRef(layer.c_layer());
        if spatial_ref.is_null() {
            return Ok(None);
        }
        let mut c_wkt: *mut std::os::raw::c_char = null_mut();
        let rv = gdal_sys::OSRExportToWkt(spatial_ref, &mut c_wkt);
        if rv != gdal_sys::OGRErr::OGRERR_NONE || c_wkt.is_null() {
            return Err(anyhow!("Could not export the input CRS to WKT"));
        }
        let wkt = CStr::from_ptr(c_wkt).to_string_lossy().into_owned();
        gdal_sys::VSIFree(c_wkt as *mut std::ffi::c_void);
        Ok(Some(wkt))
    }
}

fn scalar_field_definitions(
    layer: &gdal::vector::Layer,
) -> Vec<(String, gdal::vector::OGRFieldType::Type)> {
    use gdal::vector::OGRFieldType::*;
    layer
        .defn()
        .fields()
        .filter_map(|field| {
            let field_type = field.field_type();
            match field_type {
                OFTInteger | OFTInteger64 | OFTReal | OFTString => {
                    Some((field.name(), field_type))
                }
                _ => {
                    log::warn!(
                        "Dropping field '{}': only integer, real and string fields are carried",
                        field.name()
                    );
                    None
                }
            }
        })
        .collect()
}

/// Convert an OGR feature into the in-memory model. Geometries cross the
/// boundary as WKB.
pub fn read_feature(gdal_feature: &gdal::vector::Feature) -> anyhow::Result<Feature> {
    let geometry = gdal_feature
        .geometry_by_index(0)
        .context("Feature has no geometry")?;
    let wkb_bytes = geometry.wkb()?;
    let geometry = wkb::wkb_to_geom(&mut wkb_bytes.as_slice())
        .or_else(|err| Err(anyhow!("Could not read geometry from WKB, {:?}", err)))?;
    let fields = gdal_feature
        .fields()
        .map(|(name, value)| (name, value.and_then(scalar_field_value)))
        .collect();
    Ok(Feature {
        fid: gdal_feature.fid(),
        geometry,
        fields,
    })
}

fn scalar_field_value(value: gdal::vector::FieldValue) -> Option<FieldValue> {
    match value {
        gdal::vector::FieldValue::IntegerValue(value) => Some(FieldValue::Integer(value as i64)),
        gdal::vector::FieldValue::Integer64Value(value) => Some(FieldValue::Integer(value)),
        gdal::vector::FieldValue::RealValue(value) => Some(FieldValue::Real(value)),
        gdal::vector::FieldValue::StringValue(value) => Some(FieldValue::String(value)),
        _ => None,
    }
}

fn gdal_field_value(value: &FieldValue) -> gdal::vector::FieldValue {
    match value {
        FieldValue::Integer(value) => gdal::vector::FieldValue::Integer64Value(*value),
        FieldValue::Real(value) => gdal::vector::FieldValue::RealValue(*value),
        FieldValue::String(value) => gdal::vector::FieldValue::StringValue(value.clone()),
    }
}

/// Map a geometry type name from the command line onto the OGR geometry type
/// declared in the output schema.
pub fn geometry_type_from_name(
    name: &str,
) -> anyhow::Result<gdal::vector::OGRwkbGeometryType::Type> {
    use gdal::vector::OGRwkbGeometryType::*;
    match name.to_lowercase().as_str() {
        "point" => Ok(wkbPoint),
        "linestring" => Ok(wkbLineString),
        "polygon" => Ok(wkbPolygon),
        "multipoint" => Ok(wkbMultiPoint),
        "multilinestring" => Ok(wkbMultiLineString),
        "multipolygon" => Ok(wkbMultiPolygon),
        "geometrycollection" => Ok(wkbGeometryCollection),
        "unknown" | "geometry" => Ok(wkbUnknown),
        _ => Err(anyhow!("Unknown geometry type '{}'", name)),
    }
}

/// Write side of the pipeline. Features are appended one at a time; a single
/// transaction spans the whole run because committing per feature is a
/// massive slowdown for drivers that support transactions, e.g. GeoPackage.
pub struct GeofileSink {
    dataset: gdal::Dataset,
}

impl GeofileSink {
    pub fn create(
        output_filepath: &Path,
        driver: &str,
        crs_wkt: &str,
        geometry_type: gdal::vector::OGRwkbGeometryType::Type,
        fields: &[(String, gdal::vector::OGRFieldType::Type)],
    ) -> anyhow::Result<Self> {
        gdal::DriverManager::register_all();
        let driver =
            gdal::DriverManager::get_driver_by_name(driver).context("Getting GDAL driver")?;
        let mut dataset = driver
            .create_vector_only(output_filepath)
            .with_context(|| format!("Creating output dataset {:?}", output_filepath))?;

        let crs = gdal::spatial_ref::SpatialRef::from_wkt(crs_wkt)?;
        let layer_options = gdal::LayerOptions {
            name: "",
            srs: Some(&crs),
            ty: geometry_type,
            options: None,
        };
        let mut layer = dataset.create_layer(layer_options)?;
        let field_definitions: Vec<(&str, gdal::vector::OGRFieldType::Type)> = fields
            .iter()
            .map(|(field_name, field_type)| (field_name as &str, *field_type))
            .collect();
        layer.create_defn_fields(&field_definitions)?;
        unsafe {
            gdal_sys::OGR_L_StartTransaction(layer.c_layer());
        };
        Ok(Self { dataset })
    }

    pub fn write(&self, feature: &Feature) -> anyhow::Result<()> {
        let mut layer = self.dataset.layer(0).context("Getting output layer")?;
        let wkb_bytes = wkb::geom_to_wkb(&feature.geometry)
            .or_else(|err| Err(anyhow!("Could not write geometry to WKB, {:?}", err)))?;
        let geometry = gdal::vector::Geometry::from_wkb(&wkb_bytes)?;

        let mut field_names = Vec::new();
        let mut values = Vec::new();
        for (name, value) in &feature.fields {
            // Null fields are simply left unset on the written feature.
            if let Some(value) = value {
                field_names.push(name as &str);
                values.push(gdal_field_value(value));
            }
        }
        if field_names.is_empty() {
            layer.create_feature(geometry)?;
        } else {
            layer.create_feature_fields(geometry, &field_names, &values)?;
        }
        Ok(())
    }

    pub fn finish(self) -> anyhow::Result<()> {
        let layer = self.dataset.layer(0).context("Getting output layer")?;
        unsafe {
            gdal_sys::OGR_L_CommitTransaction(layer.c_layer());
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use testdir::testdir;

    use super::{read_feature, GeofileSink, GeofileSource};
    use crate::crs::transform::crs_to_wkt;
    use crate::geofile::feature::{Feature, FieldValue};
    use gdal::vector::LayerAccess;

    fn square(origin_x: f64, origin_y: f64) -> geo::Geometry {
        geo::Geometry::Polygon(geo::Polygon::new(
            geo::LineString::from(vec![
                (origin_x, origin_y),
                (origin_x + 1.0, origin_y),
                (origin_x + 1.0, origin_y + 1.0),
                (origin_x, origin_y + 1.0),
                (origin_x, origin_y),
            ]),
            vec![],
        ))
    }

    #[rstest]
    fn test_geofile_write_read_round_trip() {
        let features = vec![
            Feature {
                fid: None,
                geometry: square(0.0, 0.0),
                fields: vec![
                    ("name".to_string(), Some(FieldValue::String("first".to_string()))),
                    ("magnitude".to_string(), Some(FieldValue::Real(2.5))),
                ],
            },
            Feature {
                fid: None,
                geometry: square(5.0, 5.0),
                fields: vec![
                    ("name".to_string(), Some(FieldValue::String("second".to_string()))),
                    ("magnitude".to_string(), Some(FieldValue::Integer(3))),
                ],
            },
        ];

        let test_dir = testdir!();
        let geofile_filepath = test_dir.join("output.geojson");
        let crs_wkt = crs_to_wkt("EPSG:4326").unwrap();
        let schema = vec![
            ("name".to_string(), gdal::vector::OGRFieldType::OFTString),
            ("magnitude".to_string(), gdal::vector::OGRFieldType::OFTReal),
        ];

        let sink = GeofileSink::create(
            &geofile_filepath,
            "GeoJSON",
            &crs_wkt,
            gdal::vector::OGRwkbGeometryType::wkbPolygon,
            &schema,
        )
        .unwrap();
        for feature in &features {
            sink.write(feature).unwrap();
        }
        sink.finish().unwrap();

        let source = GeofileSource::open(&geofile_filepath).unwrap();
        assert_eq!(source.metadata.driver, "GeoJSON");
        assert_eq!(source.metadata.feature_count, 2);
        assert!(source.metadata.crs_wkt.is_some());

        let mut layer = source.layer().unwrap();
        let read_back: Vec<Feature> = layer
            .features()
            .map(|feature| read_feature(&feature).unwrap())
            .collect();
        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0].geometry, features[0].geometry);
        assert_eq!(read_back[1].geometry, features[1].geometry);
        assert_eq!(
            read_back[0].field("name"),
            Some(&Some(FieldValue::String("first".to_string())))
        );
        assert_eq!(
            read_back[0].field("magnitude"),
            Some(&Some(FieldValue::Real(2.5)))
        );
        assert_eq!(
            read_back[1].field("magnitude"),
            Some(&Some(FieldValue::Real(3.0)))
        );
    }

    #[rstest]
    #[case("MultiPolygon", gdal::vector::OGRwkbGeometryType::wkbMultiPolygon)]
    #[case("point", gdal::vector::OGRwkbGeometryType::wkbPoint)]
    #[case("LineString", gdal::vector::OGRwkbGeometryType::wkbLineString)]
    fn test_geometry_type_from_name(
        #[case] name: &str,
        #[case] expected: gdal::vector::OGRwkbGeometryType::Type,
    ) {
        assert_eq!(super::geometry_type_from_name(name).unwrap(), expected);
    }

    #[rstest]
    fn test_geometry_type_from_name_rejects_unknown_names() {
        assert!(super::geometry_type_from_name("Hexagon").is_err());
    }
}

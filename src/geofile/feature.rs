/// A single vector feature: a geometry plus the scalar attributes read from
/// the source layer. Field order is preserved so written features line up
/// with the output schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub fid: Option<u64>,
    pub geometry: geo::Geometry,
    pub fields: Vec<(String, Option<FieldValue>)>,
}

/// Scalar field values. See gdal::vector::OGRFieldType for the full set GDAL
/// supports; list and date types are not carried.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Real(f64),
    String(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(value) => Some(*value as f64),
            FieldValue::Real(value) => Some(*value),
            FieldValue::String(_) => None,
        }
    }
}

impl Feature {
    /// Look up a field by name. The outer Option is presence in the schema,
    /// the inner one is the null-ness of the value.
    pub fn field(&self, name: &str) -> Option<&Option<FieldValue>> {
        self.fields
            .iter()
            .find(|(field_name, _)| field_name == name)
            .map(|(_, value)| value)
    }
}

impl From<geo::Geometry> for Feature {
    fn from(value: geo::Geometry) -> Self {
        Self {
            fid: None,
            geometry: value,
            fields: Vec::new(),
        }
    }
}

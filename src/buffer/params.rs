use std::convert::Infallible;
use std::str::FromStr;

use anyhow::anyhow;
use clap::ValueEnum;

use crate::geofile::feature::Feature;

/// Style for the ends of buffered line geometries.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapStyle {
    Flat,
    Round,
    Square,
}

/// Style for the corners where buffered segments meet.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStyle {
    Round,
    Mitre,
    Bevel,
}

/// Buffer distance: either fixed for the whole run, or read per feature from
/// a named field.
#[derive(Debug, Clone, PartialEq)]
pub enum Distance {
    Fixed(f64),
    Field(String),
}

impl FromStr for Distance {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.parse::<f64>() {
            Ok(fixed) => Distance::Fixed(fixed),
            Err(_) => Distance::Field(value.to_string()),
        })
    }
}

impl Distance {
    /// Resolve the distance for one feature. A null field value means the
    /// feature passes through without buffering; that is a policy, not a
    /// failure. A missing field or a non-numeric value is a failure.
    pub fn resolve(&self, feature: &Feature) -> anyhow::Result<Option<f64>> {
        match self {
            Distance::Fixed(fixed) => Ok(Some(*fixed)),
            Distance::Field(name) => match feature.field(name) {
                None => Err(anyhow!("Feature has no field named '{}'", name)),
                Some(None) => Ok(None),
                Some(Some(value)) => value
                    .as_f64()
                    .map(Some)
                    .ok_or_else(|| anyhow!("Field '{}' does not hold a numeric value", name)),
            },
        }
    }
}

/// Parameters of one buffer operation. Every task owns its own copy; nothing
/// in here is mutated after construction.
#[derive(Debug, Clone)]
pub struct BufferParams {
    pub distance: Distance,
    pub resolution: u32,
    pub cap_style: CapStyle,
    pub join_style: JoinStyle,
    pub mitre_limit: f64,
}

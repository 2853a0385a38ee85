//! Attribute mapper reading well-known keys straight from the raw feature.
//!
//! | key            | value                                              |
//! |----------------|----------------------------------------------------|
//! | `name`         | street or path name                                |
//! | `category`     | road category                                      |
//! | `jurisdiction` | responsible authority                              |
//! | `surface`      | material (`asphalt`, `gravel`, ...)                |
//! | `form`         | road form (`cycle-path`, `carriageway`, ...)       |
//! | `speed`        | `50` for both directions or `50/30` (with/against) |
//! | `direction`    | `both`, `with-stationing`, `against-stationing`, `closed` |
//! | `two_sided`    | `true` or `false`                                  |
//!
//! Every value applies to the whole edge. Missing keys map to unknown.

use basemap_reconcile::attributes::{
    Direction, DirectionPair, Form, Jurisdiction, Material, Speed, Surface,
};
use basemap_reconcile::{
    AttributeMapper, EdgeAttributes, EdgeProperties, ImportedFeature, Layer, MappedAttributes,
    Sided,
};
use serde::de::DeserializeOwned;

/// Error for a raw value that does not parse.
#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for key {key:?}")]
pub struct InvalidRawValue {
    key: &'static str,
    value: String,
}

/// Maps the keys listed in the module docs; ignores everything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawKeyMapper;

impl AttributeMapper for RawKeyMapper {
    type Error = InvalidRawValue;

    fn map_attributes(&self, feature: &ImportedFeature) -> Result<MappedAttributes, Self::Error> {
        let raw = |key: &str| feature.raw.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let two_sided = match raw("two_sided") {
            None => false,
            Some(v) => v.parse().map_err(|_| invalid("two_sided", v))?,
        };
        let mut attributes = EdgeAttributes::unknown(two_sided);

        if let Some(v) = raw("jurisdiction") {
            attributes.jurisdiction =
                Sided::mirrored(Layer::full(Jurisdiction::Authority(v.to_string())));
        }
        let material = raw("surface").map(|v| kebab::<Material>("surface", v)).transpose()?;
        let form = raw("form").map(|v| kebab::<Form>("form", v)).transpose()?;
        if material.is_some() || form.is_some() {
            attributes.surface = Sided::mirrored(Layer::full(Surface {
                material: material.unwrap_or_default(),
                form: form.unwrap_or_default(),
            }));
        }
        if let Some(v) = raw("speed") {
            attributes.speed = Layer::full(parse_speed(v).ok_or_else(|| invalid("speed", v))?);
        }
        if let Some(v) = raw("direction") {
            attributes.direction = DirectionPair::both_sides(kebab::<Direction>("direction", v)?);
        }

        Ok(MappedAttributes {
            properties: EdgeProperties {
                name: raw("name").map(str::to_string),
                category: raw("category").map(str::to_string),
            },
            attributes,
        })
    }
}

fn invalid(key: &'static str, value: &str) -> InvalidRawValue {
    InvalidRawValue {
        key,
        value: value.to_string(),
    }
}

/// Parse a kebab-case enum name through its serde representation.
fn kebab<T: DeserializeOwned>(key: &'static str, value: &str) -> Result<T, InvalidRawValue> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| invalid(key, value))
}

fn parse_speed(value: &str) -> Option<Speed> {
    let limit = |s: &str| s.trim().parse::<u16>().ok();
    match value.split_once('/') {
        Some((with, against)) => Some(Speed {
            with_stationing: Some(limit(with)?),
            against_stationing: Some(limit(against)?),
        }),
        None => {
            let both = limit(value)?;
            Some(Speed {
                with_stationing: Some(both),
                against_stationing: Some(both),
            })
        }
    }
}

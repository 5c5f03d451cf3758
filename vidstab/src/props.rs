//! Named tunable properties.
//!
//! Detectors and estimators expose their knobs through [`Properties`], so that configuration
//! files can adjust them by name without knowing the concrete type.

use crate::prelude::v1::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

/// Object with custom properties.
pub trait Properties {
    /// Get available properties.
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        vec![]
    }

    fn props(&mut self) -> Vec<(&str, Property)> {
        self.props_mut()
            .into_iter()
            .map(|(n, p)| (n, p.into()))
            .collect()
    }

    /// Set a single property by name.
    ///
    /// Numeric values are clamped to the bounds of the property.
    fn set_prop(&mut self, name: &str, value: &PropertyValue) -> Result<()> {
        let mut props = self.props_mut();
        let (_, prop) = props
            .iter_mut()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| anyhow!("unknown property \"{name}\""))?;
        prop.set_value(value)
            .with_context(|| format!("invalid value for property \"{name}\""))
    }

    /// Apply every property of a configuration map.
    fn apply_props(&mut self, values: &BTreeMap<String, PropertyValue>) -> Result<()> {
        values
            .iter()
            .try_for_each(|(name, value)| self.set_prop(name, value))
    }
}

/// Property with a lower and upper bound.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundedProp<T> {
    pub val: T,
    pub min: T,
    pub max: T,
}

impl<T> Deref for BoundedProp<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.val
    }
}

impl<'a, T: Copy> From<BoundedPropMut<'a, T>> for BoundedProp<T> {
    fn from(BoundedPropMut { val, min, max }: BoundedPropMut<'a, T>) -> Self {
        Self {
            val: *val,
            min,
            max,
        }
    }
}

/// Snapshot of a property with its bounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Property {
    Bool(bool),
    Float(BoundedProp<f32>),
    Usize(BoundedProp<usize>),
}

impl<'a> From<PropertyMut<'a>> for Property {
    fn from(prop: PropertyMut<'a>) -> Self {
        match prop {
            PropertyMut::Bool(b) => Self::Bool(*b),
            PropertyMut::Float(p) => Self::Float(p.into()),
            PropertyMut::Usize(p) => Self::Usize(p.into()),
        }
    }
}

/// Plain property value, as found in configuration files.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Usize(usize),
    Float(f32),
}

/// Mutable property with a lower and upper bound.
pub struct BoundedPropMut<'a, T> {
    pub val: &'a mut T,
    pub min: T,
    pub max: T,
}

impl<'a, T> Deref for BoundedPropMut<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.val
    }
}

impl<'a, T> DerefMut for BoundedPropMut<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.val
    }
}

impl<'a, T: PartialOrd + Copy> BoundedPropMut<'a, T> {
    /// Clamp the underlying value between the lower and upper bounds.
    pub fn clamp(&mut self) {
        if *self.val < self.min {
            *self.val = self.min;
        } else if *self.val > self.max {
            *self.val = self.max;
        }
    }
}

/// Reference to a mutable property.
pub enum PropertyMut<'a> {
    Bool(&'a mut bool),
    Float(BoundedPropMut<'a, f32>),
    Usize(BoundedPropMut<'a, usize>),
}

impl<'a> PropertyMut<'a> {
    /// Create a boolean property.
    ///
    /// # Arguments
    ///
    /// * `b` - reference to the underlying boolean to be mutated.
    pub fn bool(b: &'a mut bool) -> Self {
        Self::Bool(b)
    }

    /// Create a floating point property.
    ///
    /// # Arguments
    ///
    /// * `val` - reference to the underlying float to be mutated.
    /// * `min` - lowest value for the property.
    /// * `max` - highest value for the property.
    pub fn float(val: &'a mut f32, min: f32, max: f32) -> Self {
        Self::Float(BoundedPropMut { val, min, max })
    }

    /// Create an integer property.
    ///
    /// # Arguments
    ///
    /// * `val` - reference to the underlying usize to be mutated.
    /// * `min` - lowest value for the property.
    /// * `max` - highest value for the property.
    pub fn usize(val: &'a mut usize, min: usize, max: usize) -> Self {
        Self::Usize(BoundedPropMut { val, min, max })
    }

    /// Assign a plain value, converting between numeric kinds where lossless enough.
    pub fn set_value(&mut self, value: &PropertyValue) -> Result<()> {
        match (self, *value) {
            (Self::Bool(b), PropertyValue::Bool(v)) => **b = v,
            (Self::Float(p), PropertyValue::Float(v)) => {
                **p = v;
                p.clamp();
            }
            (Self::Float(p), PropertyValue::Usize(v)) => {
                **p = v as f32;
                p.clamp();
            }
            (Self::Usize(p), PropertyValue::Usize(v)) => {
                **p = v;
                p.clamp();
            }
            (Self::Usize(p), PropertyValue::Float(v)) if v >= 0.0 && v.fract() == 0.0 => {
                **p = v as usize;
                p.clamp();
            }
            (_, v) => bail!("type mismatch ({v:?})"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Knobs {
        enabled: bool,
        gain: f32,
        count: usize,
    }

    impl Properties for Knobs {
        fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
            vec![
                ("enabled", PropertyMut::bool(&mut self.enabled)),
                ("gain", PropertyMut::float(&mut self.gain, 0.0, 1.0)),
                ("count", PropertyMut::usize(&mut self.count, 1, 10)),
            ]
        }
    }

    #[test]
    fn set_and_clamp() {
        let mut knobs = Knobs::default();
        knobs.set_prop("enabled", &PropertyValue::Bool(true)).unwrap();
        knobs.set_prop("gain", &PropertyValue::Float(3.0)).unwrap();
        knobs.set_prop("count", &PropertyValue::Usize(4)).unwrap();
        assert!(knobs.enabled);
        assert_eq!(knobs.gain, 1.0);
        assert_eq!(knobs.count, 4);

        knobs.set_prop("count", &PropertyValue::Usize(0)).unwrap();
        assert_eq!(knobs.count, 1);
    }

    #[test]
    fn unknown_and_mismatched() {
        let mut knobs = Knobs::default();
        assert!(knobs.set_prop("nope", &PropertyValue::Bool(true)).is_err());
        assert!(knobs.set_prop("enabled", &PropertyValue::Usize(1)).is_err());
        assert!(knobs.set_prop("count", &PropertyValue::Float(2.5)).is_err());
    }

    #[test]
    fn values_from_json() {
        let values: BTreeMap<String, PropertyValue> =
            serde_json::from_str(r#"{ "count": 7, "gain": 0.25, "enabled": true }"#).unwrap();
        let mut knobs = Knobs::default();
        knobs.apply_props(&values).unwrap();
        assert_eq!(knobs.count, 7);
        assert_eq!(knobs.gain, 0.25);
        assert!(knobs.enabled);

        let props = knobs.props();
        assert_eq!(props.len(), 3);
        assert_eq!(props[2].1, Property::Usize(BoundedProp { val: 7, min: 1, max: 10 }));
    }
}

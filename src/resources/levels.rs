//! Named, non-negative resource levels with a fixed schema
//!
//! A pool fixes its field schema at construction; every level vector
//! derived from it carries the same sorted field set. Arithmetic and
//! comparisons are component-wise; comparing or combining vectors of
//! different schemas is a usage error.

use std::fmt;
use std::rc::Rc;

pub(crate) type Schema = Rc<[String]>;

/// Build a schema from field names, sorted and deduplicated.
pub(crate) fn schema_of(names: impl IntoIterator<Item = String>) -> Schema {
    let mut fields: Vec<String> = names.into_iter().collect();
    assert!(!fields.is_empty(), "resource pools require at least one field");
    fields.sort();
    fields.dedup();
    fields.into()
}

/// Levels of named resources, one non-negative amount per schema field.
#[derive(Clone)]
pub struct ResourceLevels {
    fields: Schema,
    values: Vec<f64>,
}

impl ResourceLevels {
    pub(crate) fn zero(fields: &Schema) -> Self {
        Self {
            fields: Rc::clone(fields),
            values: vec![0.0; fields.len()],
        }
    }

    /// Levels from `(name, amount)` pairs; unnamed fields default to zero.
    ///
    /// Naming a field outside the schema is a usage error.
    pub(crate) fn from_pairs(fields: &Schema, pairs: &[(&str, f64)]) -> Self {
        let mut levels = Self::zero(fields);
        for (name, amount) in pairs {
            let index = fields
                .iter()
                .position(|field| field == name)
                .unwrap_or_else(|| panic!("resource '{name}' is not part of this supply"));
            levels.values[index] += amount;
        }
        levels
    }

    /// The level of one field, if it is part of the schema.
    pub fn get(&self, name: &str) -> Option<f64> {
        let index = self.fields.iter().position(|field| field == name)?;
        Some(self.values[index])
    }

    /// Iterate `(name, amount)` in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    pub(crate) fn all_non_negative(&self) -> bool {
        self.values.iter().all(|value| *value >= 0.0)
    }

    fn assert_same_schema(&self, other: &Self) {
        assert!(
            self.fields == other.fields,
            "resource levels of different supplies cannot be mixed"
        );
    }

    pub(crate) fn plus(&self, other: &Self) -> Self {
        self.assert_same_schema(other);
        Self {
            fields: Rc::clone(&self.fields),
            values: self
                .values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| a + b)
                .collect(),
        }
    }

    pub(crate) fn minus(&self, other: &Self) -> Self {
        self.assert_same_schema(other);
        Self {
            fields: Rc::clone(&self.fields),
            values: self
                .values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| a - b)
                .collect(),
        }
    }

    /// Replace the named fields, leaving the others unchanged.
    pub(crate) fn updated(&self, pairs: &[(&str, f64)]) -> Self {
        let mut levels = self.clone();
        for (name, amount) in pairs {
            let index = self
                .fields
                .iter()
                .position(|field| field == name)
                .unwrap_or_else(|| panic!("resource '{name}' is not part of this supply"));
            levels.values[index] = *amount;
        }
        levels
    }
}

impl PartialEq for ResourceLevels {
    fn eq(&self, other: &Self) -> bool {
        self.assert_same_schema(other);
        self.values == other.values
    }
}

impl PartialOrd for ResourceLevels {
    /// Component-wise order: `a >= b` holds only when every component does.
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.assert_same_schema(other);
        let mut any_less = false;
        let mut any_greater = false;
        for (a, b) in self.values.iter().zip(&other.values) {
            if a < b {
                any_less = true;
            } else if a > b {
                any_greater = true;
            }
        }
        match (any_less, any_greater) {
            (false, false) => Some(std::cmp::Ordering::Equal),
            (true, false) => Some(std::cmp::Ordering::Less),
            (false, true) => Some(std::cmp::Ordering::Greater),
            (true, true) => None,
        }
    }
}

impl fmt::Display for ResourceLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (name, amount)) in self.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={amount}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ResourceLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceLevels({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        schema_of(["cores".to_string(), "memory".to_string()])
    }

    #[test]
    fn pairs_default_missing_fields_to_zero() {
        let levels = ResourceLevels::from_pairs(&schema(), &[("cores", 4.0)]);
        assert_eq!(levels.get("cores"), Some(4.0));
        assert_eq!(levels.get("memory"), Some(0.0));
        assert_eq!(levels.get("disk"), None);
    }

    #[test]
    #[should_panic(expected = "not part of this supply")]
    fn unknown_fields_are_rejected() {
        ResourceLevels::from_pairs(&schema(), &[("disk", 1.0)]);
    }

    #[test]
    fn component_wise_ordering() {
        let schema = schema();
        let small = ResourceLevels::from_pairs(&schema, &[("cores", 1.0), ("memory", 1.0)]);
        let large = ResourceLevels::from_pairs(&schema, &[("cores", 2.0), ("memory", 2.0)]);
        let mixed = ResourceLevels::from_pairs(&schema, &[("cores", 3.0), ("memory", 0.5)]);
        assert!(large > small);
        assert!(small < large);
        assert!(!(mixed >= large));
        assert!(!(mixed <= large));
        assert_eq!(small, small.clone());
    }

    #[test]
    fn arithmetic_is_component_wise() {
        let schema = schema();
        let a = ResourceLevels::from_pairs(&schema, &[("cores", 2.0), ("memory", 8.0)]);
        let b = ResourceLevels::from_pairs(&schema, &[("cores", 1.0), ("memory", 3.0)]);
        let sum = a.plus(&b);
        assert_eq!(sum.get("cores"), Some(3.0));
        assert_eq!(sum.get("memory"), Some(11.0));
        let difference = sum.minus(&b);
        assert_eq!(difference.get("cores"), Some(2.0));
        assert!(difference.all_non_negative());
    }
}

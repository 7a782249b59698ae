use serde_json::{Map, Value};

use crate::manifest::{FeatureKind, ModelManifest};

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Category(String),
}

/// One request's inputs, ordered exactly as the manifest declares them.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    values: Vec<(String, FeatureValue)>,
}

impl FeatureRecord {
    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &FeatureValue> {
        self.values.iter().map(|(_, v)| v)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FeatureError {
    #[error("Missing required fields: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("Invalid numeric value for fields: {}", .0.join(", "))]
    NotNumeric(Vec<String>),

    #[error("Invalid categorical value for fields: {}", .0.join(", "))]
    NotCategorical(Vec<String>),
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    // The estimator takes f32 inputs.
    (number.is_finite() && number.abs() <= f64::from(f32::MAX)).then_some(number)
}

fn coerce_category(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Builds the feature record for `manifest` out of a request body.
///
/// Absence is checked for every field before any coercion, so a request
/// missing several fields is reported once with all of them.
pub fn assemble(manifest: &ModelManifest, payload: &Map<String, Value>) -> Result<FeatureRecord, FeatureError> {
    let missing: Vec<String> = manifest
        .features
        .iter()
        .filter(|f| is_blank(payload.get(&f.name)))
        .map(|f| f.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(FeatureError::Missing(missing));
    }

    let mut values = Vec::with_capacity(manifest.features.len());
    let mut not_numeric = Vec::new();
    let mut not_categorical = Vec::new();

    for spec in &manifest.features {
        let raw = &payload[&spec.name];
        match spec.kind {
            FeatureKind::Numeric => match coerce_number(raw) {
                Some(n) => values.push((spec.name.clone(), FeatureValue::Number(n))),
                None => not_numeric.push(spec.name.clone()),
            },
            FeatureKind::Categorical => match coerce_category(raw) {
                Some(c) => values.push((spec.name.clone(), FeatureValue::Category(c))),
                None => not_categorical.push(spec.name.clone()),
            },
        }
    }

    if !not_numeric.is_empty() {
        return Err(FeatureError::NotNumeric(not_numeric));
    }
    if !not_categorical.is_empty() {
        return Err(FeatureError::NotCategorical(not_categorical));
    }

    Ok(FeatureRecord { values })
}

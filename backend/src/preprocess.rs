//! Column transforms applied between the feature record and the estimator.
//!
//! Mirrors a fitted scikit-learn `ColumnTransformer`: each step reads its
//! columns from the record and the step outputs are concatenated in step
//! order. Fitted parameters (categories, means, scales) come from the
//! manifest.

use serde::Deserialize;

use crate::features::{FeatureRecord, FeatureValue};
use crate::manifest::{FeatureKind, ModelManifest};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandleUnknown {
    #[default]
    Error,
    Ignore,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    OneHot {
        columns: Vec<String>,
        categories: Vec<Vec<String>>,
        #[serde(default)]
        drop_first: bool,
        #[serde(default)]
        handle_unknown: HandleUnknown,
    },
    StandardScaler {
        columns: Vec<String>,
        mean: Vec<f64>,
        scale: Vec<f64>,
    },
    Passthrough {
        columns: Vec<String>,
    },
}

impl Step {
    fn columns(&self) -> &[String] {
        match self {
            Self::OneHot { columns, .. }
            | Self::StandardScaler { columns, .. }
            | Self::Passthrough { columns } => columns,
        }
    }

    fn output_width(&self) -> usize {
        match self {
            Self::OneHot {
                categories,
                drop_first,
                ..
            } => categories
                .iter()
                .map(|c| if *drop_first { c.len().saturating_sub(1) } else { c.len() })
                .sum(),
            Self::StandardScaler { columns, .. } | Self::Passthrough { columns } => columns.len(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Preprocessor {
    pub steps: Vec<Step>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PreprocessError {
    #[error("Unknown value '{value}' for field {column}")]
    UnknownCategory { column: String, value: String },

    #[error("field {0} is missing from the feature record")]
    MissingColumn(String),

    #[error("field {0} has the wrong kind for this step")]
    WrongKind(String),
}

impl Preprocessor {
    pub fn output_width(&self) -> usize {
        self.steps.iter().map(Step::output_width).sum()
    }

    /// Checks the fitted parameters against the manifest schema.
    pub fn validate(&self, manifest: &ModelManifest) -> Result<(), String> {
        for step in &self.steps {
            let expected = match step {
                Step::OneHot { .. } => FeatureKind::Categorical,
                _ => FeatureKind::Numeric,
            };
            for column in step.columns() {
                match manifest.feature(column) {
                    None => return Err(format!("step column '{}' is not a declared feature", column)),
                    Some(f) if f.kind != expected => {
                        return Err(format!(
                            "step column '{}' must be {}",
                            column,
                            expected.as_str()
                        ))
                    }
                    Some(_) => {}
                }
            }

            match step {
                Step::OneHot {
                    columns,
                    categories,
                    drop_first,
                    ..
                } => {
                    if categories.len() != columns.len() {
                        return Err("one_hot needs one category list per column".into());
                    }
                    let minimum = if *drop_first { 2 } else { 1 };
                    if let Some((column, _)) = columns
                        .iter()
                        .zip(categories)
                        .find(|(_, c)| c.len() < minimum)
                    {
                        return Err(format!("one_hot column '{}' has too few categories", column));
                    }
                }
                Step::StandardScaler {
                    columns,
                    mean,
                    scale,
                } => {
                    if mean.len() != columns.len() || scale.len() != columns.len() {
                        return Err("standard_scaler needs one mean and scale per column".into());
                    }
                    if scale.iter().any(|s| *s == 0.0 || !s.is_finite()) {
                        return Err("standard_scaler scale must be finite and non-zero".into());
                    }
                }
                Step::Passthrough { .. } => {}
            }
        }

        if self.output_width() == 0 {
            return Err("preprocessor produces no columns".into());
        }
        Ok(())
    }

    pub fn transform(&self, record: &FeatureRecord) -> Result<Vec<f32>, PreprocessError> {
        let mut row = Vec::with_capacity(self.output_width());

        for step in &self.steps {
            match step {
                Step::OneHot {
                    columns,
                    categories,
                    drop_first,
                    handle_unknown,
                } => {
                    for (column, known) in columns.iter().zip(categories) {
                        let value = category(record, column)?;
                        let skip = usize::from(*drop_first);
                        let position = known.iter().position(|c| c == value);
                        if position.is_none() && *handle_unknown == HandleUnknown::Error {
                            return Err(PreprocessError::UnknownCategory {
                                column: column.clone(),
                                value: value.to_string(),
                            });
                        }
                        row.extend(
                            (skip..known.len()).map(|i| if position == Some(i) { 1.0 } else { 0.0 }),
                        );
                    }
                }
                Step::StandardScaler {
                    columns,
                    mean,
                    scale,
                } => {
                    for ((column, m), s) in columns.iter().zip(mean).zip(scale) {
                        let value = number(record, column)?;
                        row.push(((value - m) / s) as f32);
                    }
                }
                Step::Passthrough { columns } => {
                    for column in columns {
                        row.push(number(record, column)? as f32);
                    }
                }
            }
        }

        Ok(row)
    }
}

fn number(record: &FeatureRecord, column: &str) -> Result<f64, PreprocessError> {
    match record.get(column) {
        Some(FeatureValue::Number(n)) => Ok(*n),
        Some(FeatureValue::Category(_)) => Err(PreprocessError::WrongKind(column.to_string())),
        None => Err(PreprocessError::MissingColumn(column.to_string())),
    }
}

fn category<'a>(record: &'a FeatureRecord, column: &str) -> Result<&'a str, PreprocessError> {
    match record.get(column) {
        Some(FeatureValue::Category(c)) => Ok(c),
        Some(FeatureValue::Number(_)) => Err(PreprocessError::WrongKind(column.to_string())),
        None => Err(PreprocessError::MissingColumn(column.to_string())),
    }
}

/// Estimator row for manifests without a preprocessor: numeric features in
/// declared order.
pub fn numeric_row(record: &FeatureRecord) -> Result<Vec<f32>, PreprocessError> {
    record
        .names()
        .zip(record.values())
        .map(|(name, value)| match value {
            FeatureValue::Number(n) => Ok(*n as f32),
            FeatureValue::Category(_) => Err(PreprocessError::WrongKind(name.to_string())),
        })
        .collect()
}

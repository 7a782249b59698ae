//! Deployment contract of a trained model.
//!
//! The manifest travels next to the ONNX file and records what the training
//! side fixed: the ordered feature schema, the preprocessing applied before
//! the estimator and whether the estimator output is a value or a class.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::preprocess::Preprocessor;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Numeric,
    Categorical,
}

impl FeatureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Categorical => "categorical",
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: FeatureKind,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Task {
    Regression,
    Classification {
        #[serde(deserialize_with = "class_labels")]
        labels: BTreeMap<i64, String>,
    },
}

// Tagged enum content is buffered, which loses serde_json's integer-key
// support, so keys arrive as strings and are parsed here.
fn class_labels<'de, D>(deserializer: D) -> Result<BTreeMap<i64, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, label)| {
            key.trim()
                .parse::<i64>()
                .map(|class| (class, label))
                .map_err(|_| <D::Error as de::Error>::custom(format!("class label key '{}' is not an integer", key)))
        })
        .collect()
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regression => "regression",
            Self::Classification { .. } => "classification",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelManifest {
    pub name: String,
    pub version: String,
    pub features: Vec<FeatureSpec>,
    #[serde(default)]
    pub preprocessor: Option<Preprocessor>,
    pub task: Task,
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid manifest: {0}")]
    Invalid(String),
}

impl ModelManifest {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn feature(&self, name: &str) -> Option<&FeatureSpec> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Width of the row handed to the estimator.
    pub fn input_width(&self) -> usize {
        match &self.preprocessor {
            Some(p) => p.output_width(),
            None => self.features.len(),
        }
    }

    fn validate(&self) -> Result<(), ManifestError> {
        if self.features.is_empty() {
            return Err(ManifestError::Invalid("no features declared".into()));
        }

        let mut seen = HashSet::new();
        for feature in &self.features {
            if feature.name.trim().is_empty() {
                return Err(ManifestError::Invalid("feature with empty name".into()));
            }
            if !seen.insert(feature.name.as_str()) {
                return Err(ManifestError::Invalid(format!(
                    "feature '{}' declared twice",
                    feature.name
                )));
            }
        }

        if let Task::Classification { labels } = &self.task {
            if labels.is_empty() {
                return Err(ManifestError::Invalid("classification task without labels".into()));
            }
        }

        match &self.preprocessor {
            Some(p) => p.validate(self).map_err(ManifestError::Invalid),
            None => match self.features.iter().find(|f| f.kind == FeatureKind::Categorical) {
                Some(f) => Err(ManifestError::Invalid(format!(
                    "categorical feature '{}' requires a preprocessor",
                    f.name
                ))),
                None => Ok(()),
            },
        }
    }
}

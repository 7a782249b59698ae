use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use log::debug;
use serde_json::{Map, Value};

use crate::features::{assemble, FeatureError, FeatureRecord};
use crate::inference::{Estimator, OnnxEstimator};
use crate::manifest::{ModelManifest, Task};
use crate::models::{FeatureInfo, ModelInfo, PredictionResponse};
use crate::preprocess::{numeric_row, PreprocessError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Features(#[from] FeatureError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("model returned class {0}, which has no label")]
    UnknownClass(i64),
}

/// The deployed model: manifest contract, preprocessing and estimator.
///
/// Built once at startup and shared read-only between workers.
pub struct Pipeline {
    manifest: ModelManifest,
    estimator: Box<dyn Estimator>,
    loaded_at: DateTime<Utc>,
}

impl Pipeline {
    pub fn new(manifest: ModelManifest, estimator: Box<dyn Estimator>) -> Self {
        Self {
            manifest,
            estimator,
            loaded_at: Utc::now(),
        }
    }

    pub fn load(model_path: &Path, manifest_path: &Path) -> anyhow::Result<Self> {
        let manifest = ModelManifest::load(manifest_path)
            .with_context(|| format!("loading manifest {}", manifest_path.display()))?;
        let estimator = OnnxEstimator::load(model_path, manifest.input_width())
            .with_context(|| format!("loading model {}", model_path.display()))?;
        Ok(Self::new(manifest, Box::new(estimator)))
    }

    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    /// Nothing reaches the estimator unless the whole record is valid.
    pub fn predict(&self, payload: &Map<String, Value>) -> Result<PredictionResponse, PipelineError> {
        let record = assemble(&self.manifest, payload)?;
        let row = self.encode(&record)?;
        debug!("{} caractéristiques encodées en {} entrées", self.manifest.features.len(), row.len());

        let output = self.estimator.predict(&row).map_err(PipelineError::Inference)?;
        if !output.is_finite() {
            return Err(PipelineError::Inference(anyhow::anyhow!(
                "model returned non-finite value"
            )));
        }

        match &self.manifest.task {
            Task::Regression => Ok(PredictionResponse::Prediction { prediction: output }),
            Task::Classification { labels } => {
                let class = output.round() as i64;
                labels
                    .get(&class)
                    .map(|label| PredictionResponse::Recommendation {
                        recommendation: label.clone(),
                    })
                    .ok_or(PipelineError::UnknownClass(class))
            }
        }
    }

    fn encode(&self, record: &FeatureRecord) -> Result<Vec<f32>, PreprocessError> {
        match &self.manifest.preprocessor {
            Some(p) => p.transform(record),
            None => numeric_row(record),
        }
    }

    pub fn info(&self) -> ModelInfo {
        let labels = match &self.manifest.task {
            Task::Classification { labels } => Some(labels.clone()),
            Task::Regression => None,
        };

        ModelInfo {
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            task: self.manifest.task.as_str().to_string(),
            features: self
                .manifest
                .features
                .iter()
                .map(|f| FeatureInfo {
                    name: f.name.clone(),
                    kind: f.kind.as_str().to_string(),
                })
                .collect(),
            input_width: self.manifest.input_width(),
            labels,
            loaded_at: self.loaded_at.to_rfc3339(),
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::testing::*;
    use super::*;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn yield_request() -> Map<String, Value> {
        body(json!({
            "Year": 2020,
            "average_rain_fall_mm_per_year": 1200,
            "pesticides_tonnes": 50,
            "avg_temp": 25,
            "Area": "India",
            "Item": "Rice"
        }))
    }

    #[test]
    fn regression_returns_numeric_prediction() {
        let (pipeline, calls) = crop_yield_pipeline();
        let response = pipeline.predict(&yield_request()).unwrap();
        assert!(matches!(response, PredictionResponse::Prediction { prediction } if prediction.is_finite()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn same_input_gives_same_output() {
        let (pipeline, _) = crop_yield_pipeline();
        let first = pipeline.predict(&yield_request()).unwrap();
        let second = pipeline.predict(&yield_request()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_field_never_reaches_the_estimator() {
        let (pipeline, calls) = crop_yield_pipeline();
        let mut request = yield_request();
        request.remove("avg_temp");

        let err = pipeline.predict(&request).unwrap_err();
        assert!(matches!(err, PipelineError::Features(FeatureError::Missing(ref f)) if f == &["avg_temp"]));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn encoded_row_matches_estimator_width() {
        let manifest = crop_yield_manifest();
        let width = manifest.input_width();
        let pipeline = Pipeline::new(manifest, Box::new(LinearEstimator::new(width, 0.0)));
        let record = assemble(pipeline.manifest(), &yield_request()).unwrap();
        assert_eq!(pipeline.encode(&record).unwrap().len(), width);
    }

    #[test]
    fn classifier_maps_class_index_to_label() {
        let manifest = crop_recommendation_manifest();
        // Zero weights: the output is the bias, class 1.
        let estimator = LinearEstimator {
            weights: vec![0.0; manifest.input_width()],
            bias: 1.0,
            calls: Default::default(),
        };
        let pipeline = Pipeline::new(manifest, Box::new(estimator));
        let request = body(json!({
            "Nitrogen": 90, "Phosporus": 42, "Potassium": 43,
            "Temperature": 20.8, "Humidity": 82.0, "pH": 6.5, "Rainfall": 202.9
        }));
        assert_eq!(
            pipeline.predict(&request).unwrap(),
            PredictionResponse::Recommendation {
                recommendation: "Rice".into()
            }
        );
    }

    #[test]
    fn classifier_rejects_unlabelled_class() {
        let manifest = crop_recommendation_manifest();
        let estimator = LinearEstimator {
            weights: vec![0.0; manifest.input_width()],
            bias: 99.0,
            calls: Default::default(),
        };
        let pipeline = Pipeline::new(manifest, Box::new(estimator));
        let request = body(json!({
            "Nitrogen": 1, "Phosporus": 1, "Potassium": 1,
            "Temperature": 1, "Humidity": 1, "pH": 1, "Rainfall": 1
        }));
        assert!(matches!(pipeline.predict(&request), Err(PipelineError::UnknownClass(99))));
    }

    #[test]
    fn estimator_failure_is_an_inference_error() {
        let pipeline = Pipeline::new(crop_yield_manifest(), Box::new(FailingEstimator));
        assert!(matches!(
            pipeline.predict(&yield_request()),
            Err(PipelineError::Inference(_))
        ));
    }

    #[test]
    fn info_lists_features_in_order() {
        let (pipeline, _) = crop_yield_pipeline();
        let info = pipeline.info();
        assert_eq!(info.task, "regression");
        assert_eq!(info.features[0].name, "Year");
        assert_eq!(info.features[5].name, "Item");
        assert_eq!(info.features[5].kind, "categorical");
        assert!(info.labels.is_none());
    }

    #[test]
    fn load_fails_fast_without_artifacts() {
        let err = Pipeline::load(Path::new("/nonexistent/model.onnx"), Path::new("/nonexistent/m.json"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("loading manifest"));
    }
}

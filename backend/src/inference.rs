use tract_onnx::prelude::*;

/// Trained estimator behind the pipeline: one preprocessed row in, one
/// scalar out (a regression value or a class index).
pub trait Estimator: Send + Sync {
    fn predict(&self, row: &[f32]) -> anyhow::Result<f64>;
}

pub struct OnnxEstimator {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    width: usize,
}

impl OnnxEstimator {
    /// Loads and optimizes an ONNX graph taking a `[1, width]` float input.
    pub fn load<P: AsRef<std::path::Path>>(model_path: P, width: usize) -> TractResult<Self> {
        let model = tract_onnx::onnx()
            .model_for_path(model_path)?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, width)))?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self { model, width })
    }
}

impl Estimator for OnnxEstimator {
    fn predict(&self, row: &[f32]) -> anyhow::Result<f64> {
        if row.len() != self.width {
            anyhow::bail!("expected {} inputs, got {}", self.width, row.len());
        }

        let input = Tensor::from_shape(&[1, self.width], row)?;
        let outputs = self.model.run(tvec!(input.into()))?;

        // Classifiers exported from scikit-learn emit an i64 label tensor first.
        let first = outputs
            .first()
            .ok_or_else(|| anyhow::anyhow!("model produced no outputs"))?;
        let values = first.cast_to::<f32>()?;
        let value = values
            .to_array_view::<f32>()?
            .iter()
            .next()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("model output tensor is empty"))?;

        Ok(f64::from(value))
    }
}

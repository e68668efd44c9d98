//! Facial expression classifier via ONNX Runtime.
//!
//! Scores a normalized 48×48 grayscale face patch against the seven
//! [`EmotionLabel`] classes (FER-2013 ordering).

use crate::types::{EmotionLabel, EmotionScore, FacePatch, PATCH_SIZE};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

pub const NUM_CLASSES: usize = EmotionLabel::ALL.len();
/// Tolerance when deciding whether an output vector already sums to one.
const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0} (place the FER model topology and weights in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that maps a face patch to a probability per emotion class.
pub trait EmotionClassifier: Send + Sync {
    /// Probabilities aligned with [`EmotionLabel::ALL`].
    fn classify(&self, patch: &FacePatch) -> Result<[f32; NUM_CLASSES], ClassifierError>;
}

/// Location of the two model artifacts: the ONNX graph and its external
/// weights blob. The weights must sit where the graph references them,
/// which for exported models is next to the graph file.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub topology: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    fn check(&self) -> Result<(), ClassifierError> {
        for path in [&self.topology, &self.weights] {
            if !path.exists() {
                return Err(ClassifierError::ModelNotFound(path.display().to_string()));
            }
        }
        Ok(())
    }
}

/// ONNX-backed expression classifier.
pub struct OnnxEmotionClassifier {
    session: Mutex<Session>,
}

impl OnnxEmotionClassifier {
    /// Load the classifier graph; the weights blob is resolved by ONNX Runtime
    /// relative to the graph file.
    pub fn load(files: &ModelFiles) -> Result<Self, ClassifierError> {
        files.check()?;

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(Path::new(&files.topology))?;

        tracing::info!(
            topology = %files.topology.display(),
            weights = %files.weights.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded emotion model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Shape a patch into the NHWC tensor the model expects: 1×48×48×1.
    fn preprocess(patch: &FacePatch) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros((1, PATCH_SIZE, PATCH_SIZE, 1));
        for y in 0..PATCH_SIZE {
            for x in 0..PATCH_SIZE {
                tensor[[0, y, x, 0]] = patch.values().get(y * PATCH_SIZE + x).copied().unwrap_or(0.0);
            }
        }
        tensor
    }
}

impl EmotionClassifier for OnnxEmotionClassifier {
    fn classify(&self, patch: &FacePatch) -> Result<[f32; NUM_CLASSES], ClassifierError> {
        let input = Self::preprocess(patch);

        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifierError::InferenceFailed("classifier session poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("emotion scores: {e}")))?;

        to_probabilities(raw)
    }
}

/// Validate a raw output vector and turn it into probabilities.
///
/// Vectors that are already a distribution pass through unchanged; anything
/// else is treated as logits and run through a softmax.
pub fn to_probabilities(raw: &[f32]) -> Result<[f32; NUM_CLASSES], ClassifierError> {
    if raw.len() != NUM_CLASSES {
        return Err(ClassifierError::InferenceFailed(format!(
            "expected {NUM_CLASSES} class scores, got {}",
            raw.len()
        )));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(ClassifierError::InferenceFailed(
            "non-finite class score".into(),
        ));
    }

    let mut probs = [0.0f32; NUM_CLASSES];
    probs.copy_from_slice(raw);

    let in_range = probs.iter().all(|p| (0.0..=1.0).contains(p));
    let sum: f32 = probs.iter().sum();
    if in_range && (sum - 1.0).abs() <= PROBABILITY_SUM_TOLERANCE {
        return Ok(probs);
    }

    let max = probs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut total = 0.0f32;
    for p in probs.iter_mut() {
        *p = (*p - max).exp();
        total += *p;
    }
    for p in probs.iter_mut() {
        *p /= total;
    }
    Ok(probs)
}

/// Arg-max of a probability vector; the first maximum wins on equal values.
pub fn top_emotion(probs: &[f32; NUM_CLASSES]) -> EmotionScore {
    let mut best = 0;
    for (i, &p) in probs.iter().enumerate().skip(1) {
        if p > probs[best] {
            best = i;
        }
    }
    EmotionScore {
        label: EmotionLabel::ALL[best],
        confidence: probs[best],
    }
}

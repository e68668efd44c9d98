//! Emotion decision engine. Locates faces, scores each one, picks one label.
//!
//! The engine never fails a request: detection or inference problems are
//! logged and reported in the [`Decision`], and the label falls back to
//! [`SAFE_DEFAULT`]. Zero detected faces also yields [`SAFE_DEFAULT`].

use crate::classifier::{top_emotion, ClassifierError, EmotionClassifier, ModelFiles, OnnxEmotionClassifier};
use crate::detector::{DetectionParams, DetectorError, FaceLocator, OnnxFaceLocator};
use crate::preprocess::{face_patch, to_grayscale};
use crate::types::{EmotionLabel, EmotionScore, FaceRegion, Image, ImageError};
use serde::Serialize;
use thiserror::Error;

/// Label returned when no face is found or the pipeline fails.
pub const SAFE_DEFAULT: EmotionLabel = EmotionLabel::Sad;

#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("emotion model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("image error: {0}")]
    Image(#[from] ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

/// One located face and its winning class.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredFace {
    pub region: FaceRegion,
    pub score: EmotionScore,
}

/// How the label of a [`Decision`] came about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// At least one face was scored; the label is the most confident one.
    Scored,
    /// No face was found.
    NoFace,
    /// Detection or classification failed; the label is the safe default.
    Degraded { reason: String },
}

/// Full result of evaluating one image.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub label: EmotionLabel,
    /// Faces in the order they were evaluated.
    pub faces: Vec<ScoredFace>,
    pub outcome: DecisionOutcome,
}

/// Orchestrates a [`FaceLocator`] and an [`EmotionClassifier`] over one image.
pub struct DecisionEngine {
    locator: Box<dyn FaceLocator>,
    classifier: Box<dyn EmotionClassifier>,
    params: DetectionParams,
}

impl DecisionEngine {
    pub fn new(
        locator: Box<dyn FaceLocator>,
        classifier: Box<dyn EmotionClassifier>,
        params: DetectionParams,
    ) -> Self {
        Self {
            locator,
            classifier,
            params,
        }
    }

    /// Load the ONNX face locator and emotion classifier.
    ///
    /// Any loading failure is reported as [`DecisionError::ModelUnavailable`].
    pub fn load(
        detector_path: &str,
        classifier_files: &ModelFiles,
        params: DetectionParams,
    ) -> Result<Self, DecisionError> {
        let locator = OnnxFaceLocator::load(detector_path)
            .map_err(|e| DecisionError::ModelUnavailable(format!("face detector: {e}")))?;
        let classifier = OnnxEmotionClassifier::load(classifier_files)
            .map_err(|e| DecisionError::ModelUnavailable(format!("emotion classifier: {e}")))?;

        tracing::info!(
            scale_factor = params.scale_factor,
            min_neighbors = params.min_neighbors,
            "decision engine ready"
        );
        Ok(Self::new(Box::new(locator), Box::new(classifier), params))
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// The single label for an image.
    pub fn decide(&self, image: &Image) -> EmotionLabel {
        self.evaluate(image).label
    }

    /// Decide from a raw pixel buffer; a malformed buffer yields the safe default.
    pub fn decide_pixels(&self, data: Vec<u8>, width: u32, height: u32, channels: u8) -> Decision {
        match Image::new(data, width, height, channels) {
            Ok(image) => self.evaluate(&image),
            Err(e) => degraded(DecisionError::from(e)),
        }
    }

    /// Evaluate an image, keeping per-face scores for diagnostics.
    pub fn evaluate(&self, image: &Image) -> Decision {
        match self.score_faces(image) {
            Ok(faces) => match pick_winner(&faces) {
                Some(score) => Decision {
                    label: score.label,
                    faces,
                    outcome: DecisionOutcome::Scored,
                },
                None => {
                    tracing::info!("no face detected, using safe default");
                    Decision {
                        label: SAFE_DEFAULT,
                        faces,
                        outcome: DecisionOutcome::NoFace,
                    }
                }
            },
            Err(e) => degraded(e),
        }
    }

    fn score_faces(&self, image: &Image) -> Result<Vec<ScoredFace>, DecisionError> {
        let gray = to_grayscale(image);
        let regions = self.locator.locate(&gray, &self.params)?;
        tracing::debug!(faces = regions.len(), "faces located");

        let mut faces = Vec::with_capacity(regions.len());
        for region in regions {
            let patch = face_patch(&gray, &region)?;
            let probs = self.classifier.classify(&patch)?;
            let score = top_emotion(&probs);
            tracing::debug!(?region, label = %score.label, confidence = score.confidence, "face scored");
            faces.push(ScoredFace { region, score });
        }
        Ok(faces)
    }
}

/// Strictly highest confidence wins; the earliest face wins on exact ties.
pub fn pick_winner(faces: &[ScoredFace]) -> Option<EmotionScore> {
    let mut best: Option<EmotionScore> = None;
    for face in faces {
        match best {
            Some(b) if face.score.confidence <= b.confidence => {}
            _ => best = Some(face.score),
        }
    }
    best
}

fn degraded(error: DecisionError) -> Decision {
    tracing::warn!(error = %error, "emotion detection failed, using safe default");
    Decision {
        label: SAFE_DEFAULT,
        faces: Vec::new(),
        outcome: DecisionOutcome::Degraded {
            reason: error.to_string(),
        },
    }
}

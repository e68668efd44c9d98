//! feeltune-core — Facial expression to emotion label.
//!
//! Locates faces with SCRFD and scores each one with a FER-style expression
//! classifier, both running via ONNX Runtime for CPU inference. The
//! [`DecisionEngine`] reduces the per-face scores to a single label.

pub mod classifier;
pub mod decision;
pub mod detector;
pub mod preprocess;
pub mod types;

pub use classifier::{EmotionClassifier, ModelFiles, OnnxEmotionClassifier};
pub use decision::{Decision, DecisionEngine, DecisionError, DecisionOutcome, ScoredFace};
pub use detector::{DetectionParams, FaceLocator, OnnxFaceLocator};
pub use types::{emoji_for, EmotionLabel, EmotionScore, FacePatch, FaceRegion, GrayFrame, Image, ImageError};

//! One capture → decide → recommend → render pass.

use feeltune_catalog::{CatalogEngine, RecommendationSet};
use feeltune_core::{Decision, DecisionEngine, DecisionOutcome, Image};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("cannot open image {path}: {source}")]
    Open {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("unusable image: {0}")]
    Image(#[from] feeltune_core::ImageError),
}

/// Produces the photo to analyze.
pub trait ImageSource {
    fn capture(&mut self) -> Result<Image, CaptureError>;
}

/// Reads a photo from disk. Any format the `image` crate decodes is accepted.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ImageSource for FileSource {
    fn capture(&mut self) -> Result<Image, CaptureError> {
        let decoded = image::open(&self.path).map_err(|source| CaptureError::Open {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(
            path = %self.path.display(),
            width = decoded.width(),
            height = decoded.height(),
            "image loaded"
        );
        Ok(Image::from_dynamic(&decoded)?)
    }
}

/// Presents results to the user.
pub trait RenderSink {
    fn emotion(&mut self, decision: &Decision) -> std::io::Result<()>;
    fn recommendations(&mut self, set: &RecommendationSet) -> std::io::Result<()>;
    /// A non-fatal note, e.g. that offline recommendations are shown.
    fn advise(&mut self, note: &str) -> std::io::Result<()>;
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("cannot write output: {0}")]
    Render(#[from] std::io::Error),
}

/// Result of one pass.
#[derive(Debug)]
pub struct PassResult {
    pub decision: Decision,
    pub recommendations: RecommendationSet,
}

pub struct Pipeline {
    decision: DecisionEngine,
    catalog: CatalogEngine,
}

impl Pipeline {
    pub fn new(decision: DecisionEngine, catalog: CatalogEngine) -> Self {
        Self { decision, catalog }
    }

    /// Capture one image, pick its emotion, and render matching music.
    ///
    /// Only capture and output failures are errors; analysis and catalog
    /// problems degrade to the safe default label and the offline table.
    pub fn run_once(
        &self,
        source: &mut dyn ImageSource,
        sink: &mut dyn RenderSink,
    ) -> Result<PassResult, PipelineError> {
        let image = source.capture()?;
        let decision = self.decision.evaluate(&image);
        tracing::info!(label = %decision.label, faces = decision.faces.len(), "emotion decided");

        sink.emotion(&decision)?;
        match &decision.outcome {
            DecisionOutcome::NoFace => sink.advise("No face detected")?,
            DecisionOutcome::Degraded { .. } => {
                sink.advise("Emotion analysis failed, showing a default mood")?
            }
            DecisionOutcome::Scored => {}
        }

        let recommendations = self.catalog.recommend(decision.label);
        if let Some(note) = recommendations.advisory() {
            sink.advise(&note)?;
        }
        sink.recommendations(&recommendations)?;

        Ok(PassResult {
            decision,
            recommendations,
        })
    }
}

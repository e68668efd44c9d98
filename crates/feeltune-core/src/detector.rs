//! Face location: the [`FaceLocator`] seam and an SCRFD implementation via
//! ONNX Runtime.
//!
//! The SCRFD locator runs the model over a small image pyramid (one level per
//! `scale_factor` step), decodes the anchor-free 3-stride outputs, and groups
//! overlapping candidates. A group survives only when it gathered at least
//! `min_neighbors` overlapping candidates besides its strongest member.

use crate::preprocess::resize_bilinear;
use crate::types::{FaceRegion, GrayFrame};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const PYRAMID_MAX_LEVELS: usize = 3;
/// Pyramid levels below this short side (in input pixels) are skipped.
const PYRAMID_MIN_SIDE: f32 = 160.0;

pub const DEFAULT_SCALE_FACTOR: f32 = 1.3;
pub const DEFAULT_MIN_NEIGHBORS: u32 = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (place the SCRFD model in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid detection parameters: {0}")]
    InvalidParams(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detection sensitivity knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    /// Size step between pyramid levels; must be greater than 1.
    pub scale_factor: f32,
    /// Overlapping candidates a detection needs to be reported.
    pub min_neighbors: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
        }
    }
}

impl DetectionParams {
    pub fn validate(&self) -> Result<(), DetectorError> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
            return Err(DetectorError::InvalidParams(format!(
                "scale_factor must be > 1.0, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }
}

/// Anything that can find faces in a grayscale frame.
pub trait FaceLocator: Send + Sync {
    fn locate(&self, frame: &GrayFrame, params: &DetectionParams)
        -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Raw detection in original frame coordinates.
#[derive(Debug, Clone)]
struct Candidate {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face locator.
pub struct OnnxFaceLocator {
    session: Mutex<Session>,
    /// Per-stride output indices [(score, bbox)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl OnnxFaceLocator {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        // 3 strides × score/bbox, optionally followed by keypoints
        if num_outputs < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            stride_indices,
        })
    }

    /// Run one pyramid level and return its raw candidates.
    fn detect_level(
        &self,
        session: &mut Session,
        frame: &GrayFrame,
        shrink: f32,
    ) -> Result<Vec<Candidate>, DetectorError> {
        let (input, letterbox) = preprocess(frame, shrink);

        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            candidates.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }
        Ok(candidates)
    }
}

impl FaceLocator for OnnxFaceLocator {
    fn locate(
        &self,
        frame: &GrayFrame,
        params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, DetectorError> {
        params.validate()?;
        if frame.width == 0 || frame.height == 0 {
            return Ok(Vec::new());
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("detector session poisoned".into()))?;

        let mut candidates = Vec::new();
        for shrink in pyramid_levels(frame.width, frame.height, params.scale_factor) {
            candidates.extend(self.detect_level(&mut session, frame, shrink)?);
        }

        let raw = candidates.len();
        let kept = group_candidates(candidates, SCRFD_NMS_THRESHOLD, params.min_neighbors);
        tracing::debug!(raw, kept = kept.len(), "SCRFD candidates grouped");

        Ok(kept
            .iter()
            .filter_map(|c| to_region(c, frame.width, frame.height))
            .collect())
    }
}

/// Letterbox fit scale of a frame into the SCRFD input square.
fn fit_scale(width: u32, height: u32) -> f32 {
    let scale_w = SCRFD_INPUT_SIZE as f32 / width as f32;
    let scale_h = SCRFD_INPUT_SIZE as f32 / height as f32;
    scale_w.min(scale_h)
}

/// Shrink factors for each pyramid level: 1, 1/f, 1/f², ...
///
/// The first level is always present; later levels stop once the shrunken
/// frame's short side falls under [`PYRAMID_MIN_SIDE`].
fn pyramid_levels(width: u32, height: u32, scale_factor: f32) -> Vec<f32> {
    let short_side = width.min(height) as f32 * fit_scale(width, height);
    let mut levels = vec![1.0f32];
    let mut shrink = 1.0f32;
    while levels.len() < PYRAMID_MAX_LEVELS {
        shrink /= scale_factor;
        if short_side * shrink < PYRAMID_MIN_SIDE {
            break;
        }
        levels.push(shrink);
    }
    levels
}

/// Preprocess a grayscale frame into a NCHW float tensor with letterbox
/// padding, shrinking the fitted frame by `shrink` (pyramid level).
fn preprocess(frame: &GrayFrame, shrink: f32) -> (Array4<f32>, LetterboxInfo) {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let scale = fit_scale(frame.width, frame.height) * shrink;

    let new_w = ((width as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
    let pad_x = (SCRFD_INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (SCRFD_INPUT_SIZE - new_h) as f32 / 2.0;

    let letterbox = LetterboxInfo { scale, pad_x, pad_y };
    let resized = resize_bilinear(&frame.data, width, height, new_w, new_h);

    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;

    // Pad with SCRFD_MEAN → normalizes to 0.0
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for y in 0..SCRFD_INPUT_SIZE {
        for x in 0..SCRFD_INPUT_SIZE {
            let pixel = if y >= pad_y_start
                && y < pad_y_start + new_h
                && x >= pad_x_start
                && x < pad_x_start + new_w
            {
                resized[(y - pad_y_start) * new_w + (x - pad_x_start)] as f32
            } else {
                SCRFD_MEAN
            };

            let normalized = (pixel - SCRFD_MEAN) / SCRFD_STD;
            // Grayscale → 3-channel: replicate Y → [R=Y, G=Y, B=Y]
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    (tensor, letterbox)
}

/// Discover output tensor ordering by name.
///
/// Named exports ("score_8", "bbox_16", ...) are mapped directly. Otherwise
/// the standard positional ordering is assumed:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(found) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [found[0], found[1], found[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
            );
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Candidate> {
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid_h * grid_w * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid_w) as f32 * s;
        let anchor_cy = (anchor_idx / grid_w) as f32 * s;

        // [x1_offset, y1_offset, x2_offset, y2_offset] * stride
        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = anchor_cx - bboxes[off] * s;
        let y1 = anchor_cy - bboxes[off + 1] * s;
        let x2 = anchor_cx + bboxes[off + 2] * s;
        let y2 = anchor_cy + bboxes[off + 3] * s;

        // Map from letterboxed space to original frame space
        let orig_x1 = (x1 - letterbox.pad_x) / letterbox.scale;
        let orig_y1 = (y1 - letterbox.pad_y) / letterbox.scale;
        let orig_x2 = (x2 - letterbox.pad_x) / letterbox.scale;
        let orig_y2 = (y2 - letterbox.pad_y) / letterbox.scale;

        detections.push(Candidate {
            x: orig_x1,
            y: orig_y1,
            width: orig_x2 - orig_x1,
            height: orig_y2 - orig_y1,
            confidence: score,
        });
    }

    detections
}

/// Non-maximum suppression that also counts how many candidates each kept
/// detection absorbed, dropping those with fewer than `min_neighbors`.
fn group_candidates(mut candidates: Vec<Candidate>, iou_threshold: f32, min_neighbors: u32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }

        let mut neighbors = 0u32;
        for j in (i + 1)..candidates.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&candidates[i], &candidates[j]) > iou_threshold {
                suppressed[j] = true;
                neighbors += 1;
            }
        }

        if neighbors >= min_neighbors {
            keep.push(candidates[i].clone());
        }
    }

    keep
}

/// Compute Intersection-over-Union between two candidates.
fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

/// Round a candidate to an integer rectangle clipped to the frame.
fn to_region(c: &Candidate, width: u32, height: u32) -> Option<FaceRegion> {
    let x1 = c.x.round().clamp(0.0, width as f32) as u32;
    let y1 = c.y.round().clamp(0.0, height as f32) as u32;
    let x2 = (c.x + c.width).round().clamp(0.0, width as f32) as u32;
    let y2 = (c.y + c.height).round().clamp(0.0, height as f32) as u32;

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(FaceRegion {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Candidate {
        Candidate { x, y, width: w, height: h, confidence: conf }
    }

    #[test]
    fn test_default_params() {
        let p = DetectionParams::default();
        assert_eq!(p.scale_factor, 1.3);
        assert_eq!(p.min_neighbors, 5);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_params_reject_non_growing_scale() {
        let p = DetectionParams { scale_factor: 1.0, min_neighbors: 5 };
        assert!(matches!(p.validate(), Err(DetectorError::InvalidParams(_))));
        let p = DetectionParams { scale_factor: f32::NAN, min_neighbors: 5 };
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_iou_identical() {
        let a = cand(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = cand(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = cand(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_grouping_without_neighbor_requirement_is_nms() {
        let candidates = vec![
            cand(0.0, 0.0, 100.0, 100.0, 0.9),
            cand(5.0, 5.0, 100.0, 100.0, 0.8),
            cand(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = group_candidates(candidates, 0.4, 0);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_grouping_drops_isolated_candidates() {
        let mut candidates: Vec<Candidate> = (0..5)
            .map(|i| cand(i as f32, i as f32, 100.0, 100.0, 0.9 - i as f32 * 0.05))
            .collect();
        // A lone candidate elsewhere
        candidates.push(cand(400.0, 400.0, 50.0, 50.0, 0.95));

        let result = group_candidates(candidates, 0.4, 4);
        assert_eq!(result.len(), 1);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_grouping_empty() {
        assert!(group_candidates(vec![], 0.4, 5).is_empty());
    }

    #[test]
    fn test_pyramid_levels_shrink_by_scale_factor() {
        let levels = pyramid_levels(640, 640, 1.3);
        assert_eq!(levels.len(), 3);
        assert!((levels[1] - 1.0 / 1.3).abs() < 1e-6);
        assert!((levels[2] - 1.0 / 1.69).abs() < 1e-6);
    }

    #[test]
    fn test_pyramid_levels_stop_at_min_side() {
        // 4:1 panorama fits at 640x160, so no room to shrink further
        let levels = pyramid_levels(1280, 320, 1.3);
        assert_eq!(levels, vec![1.0]);
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let frame = GrayFrame { data: vec![0; 320 * 240], width: 320, height: 240 };
        let (tensor, letterbox) = preprocess(&frame, 1.0);
        assert_eq!(tensor.shape(), &[1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE]);

        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let boxed_x = orig_x * letterbox.scale + letterbox.pad_x;
        let boxed_y = orig_y * letterbox.scale + letterbox.pad_y;
        let recovered_x = (boxed_x - letterbox.pad_x) / letterbox.scale;
        let recovered_y = (boxed_y - letterbox.pad_y) / letterbox.scale;

        assert!((recovered_x - orig_x).abs() < 0.1, "x: {recovered_x} vs {orig_x}");
        assert!((recovered_y - orig_y).abs() < 0.1, "y: {recovered_y} vs {orig_y}");
    }

    #[test]
    fn test_preprocess_padding_normalizes_to_zero() {
        // Wide frame leaves vertical padding at the top rows
        let frame = GrayFrame { data: vec![255; 640 * 320], width: 640, height: 320 };
        let (tensor, letterbox) = preprocess(&frame, 1.0);
        assert!(letterbox.pad_y > 0.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let mid = SCRFD_INPUT_SIZE / 2;
        assert!(tensor[[0, 1, mid, mid]] > 0.9);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(2, 0), (5, 3), (8, 6)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_decode_stride_maps_back_to_frame() {
        let letterbox = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 80.0 };
        let stride = 32;
        let anchors = (SCRFD_INPUT_SIZE / stride).pow(2) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        // Anchor cell (row 5, col 4), first anchor: centre (128, 160)
        let idx = (5 * (SCRFD_INPUT_SIZE / stride) + 4) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let dets = decode_stride(&scores, &bboxes, stride, &letterbox, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - 48.0).abs() < 1e-4, "x = {}", d.x);
        assert!((d.y - 24.0).abs() < 1e-4, "y = {}", d.y);
        assert!((d.width - 32.0).abs() < 1e-4);
        assert!((d.height - 32.0).abs() < 1e-4);
    }

    #[test]
    fn test_to_region_clips_to_frame() {
        let c = cand(-10.0, 5.4, 50.0, 200.0, 0.9);
        let r = to_region(&c, 100, 100).unwrap();
        assert_eq!(r, FaceRegion { x: 0, y: 5, width: 40, height: 95 });
    }

    #[test]
    fn test_to_region_rejects_outside() {
        let c = cand(150.0, 150.0, 20.0, 20.0, 0.9);
        assert!(to_region(&c, 100, 100).is_none());
    }
}

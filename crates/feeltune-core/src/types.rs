use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Side length of the square patch fed to the emotion classifier.
pub const PATCH_SIZE: usize = 48;

/// The seven expression categories, in classifier output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl EmotionLabel {
    /// All labels, aligned with the classifier's probability vector.
    pub const ALL: [EmotionLabel; 7] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
        EmotionLabel::Neutral,
    ];

    /// Label at position `index` of the classifier output.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Angry => "angry",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Neutral => "neutral",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            EmotionLabel::Angry => "😠",
            EmotionLabel::Disgust => "🤢",
            EmotionLabel::Fear => "😨",
            EmotionLabel::Happy => "😊",
            EmotionLabel::Sad => "😢",
            EmotionLabel::Surprise => "😮",
            EmotionLabel::Neutral => "😐",
        }
    }
}

/// Emoji for free-form label text; unrecognized text gets a shrug face.
pub fn emoji_for(name: &str) -> &'static str {
    name.parse::<EmotionLabel>()
        .map(|label| label.emoji())
        .unwrap_or("🤔")
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown emotion label: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for EmotionLabel {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == wanted)
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

/// Axis-aligned face rectangle in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Winning class of one face and its probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    pub label: EmotionLabel,
    /// Probability in [0, 1].
    pub confidence: f32,
}

/// A decoded still image: row-major, 8 bits per sample, 1 or 3 channels.
#[derive(Debug, Clone)]
pub struct Image {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("unsupported channel count {0} (expected 1 or 3)")]
    UnsupportedChannels(u8),
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("empty image ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("face region {region:?} lies outside the {width}x{height} image")]
    RegionOutOfBounds {
        region: FaceRegion,
        width: u32,
        height: u32,
    },
}

impl Image {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self, ImageError> {
        if channels != 1 && channels != 3 {
            return Err(ImageError::UnsupportedChannels(channels));
        }
        if width == 0 || height == 0 {
            return Err(ImageError::Empty { width, height });
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(ImageError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    /// Convert a decoded image. Luma images stay single-channel; anything
    /// else (RGBA, 16-bit, ...) is flattened to 8-bit RGB.
    pub fn from_dynamic(img: &image::DynamicImage) -> Result<Self, ImageError> {
        use image::DynamicImage;

        match img {
            DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_) => {
                let luma = img.to_luma8();
                let (width, height) = luma.dimensions();
                Self::new(luma.into_raw(), width, height, 1)
            }
            _ => {
                let rgb = img.to_rgb8();
                let (width, height) = rgb.dimensions();
                Self::new(rgb.into_raw(), width, height, 3)
            }
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }
}

/// Single-channel frame handed to the face locator.
#[derive(Debug, Clone)]
pub struct GrayFrame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A normalized 48×48 grayscale face crop, values in [0, 1].
#[derive(Debug, Clone)]
pub struct FacePatch {
    values: Vec<f32>,
}

impl FacePatch {
    pub(crate) fn from_values(values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), PATCH_SIZE * PATCH_SIZE);
        Self { values }
    }

    /// Row-major pixel intensities.
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

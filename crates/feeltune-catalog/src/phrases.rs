use feeltune_core::EmotionLabel;

/// Phrase searched for when the emotion is not recognized.
pub const DEFAULT_PHRASE: &str = "lofi chill";

/// Playlist search phrase for an emotion.
pub fn search_phrase(label: Option<EmotionLabel>) -> &'static str {
    match label {
        Some(EmotionLabel::Happy) => "happy hits",
        Some(EmotionLabel::Sad) => "sad songs",
        Some(EmotionLabel::Angry) => "rock metal",
        Some(EmotionLabel::Fear) => "chill ambient",
        Some(EmotionLabel::Surprise) => "new music",
        Some(EmotionLabel::Neutral) => "lofi beats",
        Some(EmotionLabel::Disgust) => "focus music",
        None => DEFAULT_PHRASE,
    }
}

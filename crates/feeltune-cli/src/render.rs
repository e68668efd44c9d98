//! Terminal and JSON renderers.

use crate::pipeline::RenderSink;
use feeltune_catalog::{RecommendationSet, Track};
use feeltune_core::{Decision, DecisionOutcome};
use serde::Serialize;
use std::io::{self, Write};

/// Human-readable output.
pub struct TerminalSink<W: Write> {
    out: W,
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn tracks(&mut self, tracks: &[Track]) -> io::Result<()> {
        for track in tracks {
            writeln!(self.out)?;
            writeln!(self.out, "### {}", track.title)?;
            writeln!(self.out, "Artist: {}", track.artist)?;
            writeln!(self.out, "Album: {}", track.album)?;
            match &track.preview_url {
                Some(url) => writeln!(self.out, "Preview: {url}")?,
                None => writeln!(self.out, "Preview not available")?,
            }
            if let Some(url) = &track.catalog_url {
                writeln!(self.out, "Open in Spotify: {url}")?;
            }
        }
        Ok(())
    }
}

impl<W: Write> RenderSink for TerminalSink<W> {
    fn emotion(&mut self, decision: &Decision) -> io::Result<()> {
        for (i, face) in decision.faces.iter().enumerate() {
            writeln!(
                self.out,
                "face {}: {} ({:.0}%) at {}x{}+{}+{}",
                i + 1,
                face.score.label,
                face.score.confidence * 100.0,
                face.region.width,
                face.region.height,
                face.region.x,
                face.region.y
            )?;
        }
        writeln!(
            self.out,
            "I see you're feeling {} {}",
            decision.label.as_str().to_uppercase(),
            decision.label.emoji()
        )
    }

    fn recommendations(&mut self, set: &RecommendationSet) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "## Here's some music to match your mood")?;
        if set.tracks.is_empty() {
            writeln!(self.out, "No tracks found")?;
        }
        self.tracks(&set.tracks)
    }

    fn advise(&mut self, note: &str) -> io::Result<()> {
        writeln!(self.out, "note: {note}")
    }
}

#[derive(Serialize)]
struct Report<'a> {
    emotion: Option<&'a str>,
    emoji: Option<&'a str>,
    decision: Option<&'a DecisionOutcome>,
    faces: usize,
    notes: &'a [String],
    recommendations: &'a RecommendationSet,
}

/// Collects one pass and writes it as a single JSON document once the
/// recommendations arrive.
pub struct JsonSink<W: Write> {
    out: W,
    decision: Option<Decision>,
    notes: Vec<String>,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            decision: None,
            notes: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RenderSink for JsonSink<W> {
    fn emotion(&mut self, decision: &Decision) -> io::Result<()> {
        self.decision = Some(decision.clone());
        Ok(())
    }

    fn recommendations(&mut self, set: &RecommendationSet) -> io::Result<()> {
        let decision = self.decision.as_ref();
        let report = Report {
            emotion: decision.map(|d| d.label.as_str()),
            emoji: decision.map(|d| d.label.emoji()),
            decision: decision.map(|d| &d.outcome),
            faces: decision.map_or(0, |d| d.faces.len()),
            notes: &self.notes,
            recommendations: set,
        };
        serde_json::to_writer_pretty(&mut self.out, &report)?;
        writeln!(self.out)
    }

    fn advise(&mut self, note: &str) -> io::Result<()> {
        self.notes.push(note.to_string());
        Ok(())
    }
}

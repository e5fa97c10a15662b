//! Overlay records and playback synchronization.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How long an overlay stays on screen after its timestamp, in seconds.
pub const FRESHNESS_WINDOW_SECS: f64 = 3.0;

const MAX_TEXT_CHARS: usize = 200;
const MAX_TEXT_WORDS: usize = 24;

/// Coarse stage of a football play. Wire names are the kebab-case strings the
/// model is prompted to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    PreSnap,
    MidPlay,
    PostPlay,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::PreSnap, Phase::MidPlay, Phase::PostPlay];

    pub fn label(&self) -> &'static str {
        match self {
            Phase::PreSnap => "pre-snap",
            Phase::MidPlay => "mid-play",
            Phase::PostPlay => "post-play",
        }
    }
}

/// A timestamped text annotation rendered atop the video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overlay {
    pub timestamp: f64,
    pub phase: Phase,
    pub text: String,
}

impl Overlay {
    fn is_valid(&self) -> bool {
        self.timestamp.is_finite()
            && self.timestamp >= 0.0
            && !self.text.trim().is_empty()
            && self.text.chars().count() <= MAX_TEXT_CHARS
            && self.text.split_whitespace().count() <= MAX_TEXT_WORDS
    }
}

/// The model replied with something that does not parse into the expected
/// schema. The raw reply is kept so it can be surfaced to the caller.
#[derive(Debug, Error)]
#[error("failed to parse model reply as JSON: {reason}")]
pub struct ParseFailure {
    pub reason: String,
    pub raw: String,
}

/// Remove the markdown code fences the model tends to wrap JSON in.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Parse a model reply into overlay records. Records with out-of-range
/// timestamps or text are dropped; a reply that is not a JSON array of
/// overlays at all is a [`ParseFailure`].
pub fn parse_overlays(reply: &str) -> Result<Vec<Overlay>, ParseFailure> {
    let cleaned = strip_code_fences(reply);
    let overlays: Vec<Overlay> = serde_json::from_str(&cleaned).map_err(|e| ParseFailure {
        reason: e.to_string(),
        raw: reply.to_string(),
    })?;

    let total = overlays.len();
    let overlays: Vec<Overlay> = overlays.into_iter().filter(Overlay::is_valid).collect();
    if overlays.len() < total {
        log::warn!(
            "dropped {} of {} overlays failing validation",
            total - overlays.len(),
            total
        );
    }
    Ok(overlays)
}

/// One analysis call's worth of overlays. The collection replaces any prior
/// one and is not required to be sorted.
#[derive(Debug, Clone, Default)]
pub struct OverlayTrack {
    overlays: Vec<Overlay>,
}

impl OverlayTrack {
    pub fn new(overlays: Vec<Overlay>) -> Self {
        Self { overlays }
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    /// The overlay to show at `time`: the latest one whose timestamp has
    /// passed, as long as it is still inside the freshness window. With equal
    /// timestamps the later record wins.
    pub fn active_at(&self, time: f64) -> Option<&Overlay> {
        let candidate = self
            .overlays
            .iter()
            .filter(|o| o.timestamp <= time)
            .max_by(|a, b| a.timestamp.total_cmp(&b.timestamp))?;
        (time - candidate.timestamp < FRESHNESS_WINDOW_SECS).then_some(candidate)
    }

    /// Fractional positions of each overlay on a seek bar of `duration`
    /// seconds, in collection order.
    pub fn marker_positions(&self, duration: f64) -> Vec<f64> {
        if !(duration > 0.0) {
            return Vec::new();
        }
        self.overlays
            .iter()
            .map(|o| (o.timestamp / duration).clamp(0.0, 1.0))
            .collect()
    }

    pub fn by_phase(&self, phase: Phase) -> impl Iterator<Item = &Overlay> {
        self.overlays.iter().filter(move |o| o.phase == phase)
    }
}

/// Render seconds as a player clock, `m:ss`.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

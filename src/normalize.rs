//! Canonical forms for free-text track and artist names.
//!
//! Both sources spell the same song differently: YouTube titles carry video
//! tags ("(Official Video)", "[Lyrics]"), Spotify titles carry featured-artist
//! credits, and YouTube auto-generated channels append " - Topic" to the
//! artist. The functions here collapse those variants onto one lowercase key.

use regex::Regex;
use std::sync::LazyLock;

/// Value used for a name that is missing or empty after cleaning.
pub const UNKNOWN: &str = "unknown";

/// Noise markers in priority order. Matched against the lowercased title.
///
/// The first entry that occurs anywhere in the title wins, even if a later
/// entry occurs further left. The title is cut just before the winning
/// marker's first occurrence and the scan stops there: one cut per call.
pub const NOISE_MARKERS: &[&str] = &[
    "(feat.",
    "[feat.",
    "(ft.",
    "[ft.",
    "(featuring",
    " feat. ",
    " ft. ",
    "(with ",
    "(official video)",
    "(official music video)",
    "(official audio)",
    "(official lyric video)",
    "(official visualizer)",
    "[official video]",
    "[official music video]",
    "[official audio]",
    "(lyric video)",
    "(lyrics)",
    "[lyrics]",
    "(visualizer)",
    "(audio)",
    "[audio]",
    "(remix)",
    "(remastered",
    " - remastered",
    "(live",
    "(sped up)",
    "(slowed",
    " | ",
];

/// Characters trimmed from both ends of a cleaned title.
const BOUNDARY_CHARS: &[char] = &[' ', '.', '_', '-'];

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// YouTube auto-generated channels: "Artist - Topic".
const TOPIC_SUFFIXES: &[&str] = &[" - topic", "- topic"];

/// Find the priority marker for a lowercased title: `(marker, byte offset)`.
pub fn find_noise_marker(lowered: &str) -> Option<(&'static str, usize)> {
    NOISE_MARKERS
        .iter()
        .find_map(|m| lowered.find(*m).map(|pos| (*m, pos)))
}

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE_RE.replace_all(s, " ").into_owned()
}

/// Canonicalize a track title. Never fails: missing input maps to [`UNKNOWN`].
pub fn normalize_track(raw: Option<&str>) -> String {
    let raw = match raw {
        Some(r) if !r.trim().is_empty() => r,
        _ => return UNKNOWN.to_string(),
    };

    // Collapse first so " feat. " also matches tab- or newline-separated credits.
    let mut lowered = collapse_whitespace(&raw.to_lowercase());
    if let Some((_, pos)) = find_noise_marker(&lowered) {
        lowered.truncate(pos);
    }

    let cleaned = lowered.trim_matches(BOUNDARY_CHARS);

    if cleaned.is_empty() {
        UNKNOWN.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Canonicalize an artist name. Never fails: missing input maps to [`UNKNOWN`].
///
/// Only the first of several comma-separated artists is kept, so
/// "Artist A, Artist B" and "Artist A" group together. Featured artists are
/// intentionally not part of the key.
pub fn normalize_artist(raw: Option<&str>) -> String {
    let raw = match raw {
        Some(r) if !r.trim().is_empty() => r,
        _ => return UNKNOWN.to_string(),
    };

    let lowered = raw.to_lowercase();
    let first = lowered.split(',').next().unwrap_or_default();
    let mut name = collapse_whitespace(first).trim().to_string();

    // Strip repeatedly so "x - topic - topic" and "x - topic" agree.
    while let Some(stripped) = TOPIC_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(*suffix))
    {
        name = stripped.trim().to_string();
    }

    if name.is_empty() || name == UNKNOWN {
        UNKNOWN.to_string()
    } else {
        name
    }
}

/// True for the sentinel produced by the normalizers.
pub fn is_unknown(value: &str) -> bool {
    value == UNKNOWN
}

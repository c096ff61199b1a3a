//! Timed caption containers: WebVTT and SubRip.
//!
//! Each cue becomes an [`Utterance`] carrying its start/end timestamps as they
//! appear in the file, the raw cue text, and a best-effort speaker label.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::models::{UNKNOWN_SPEAKER, Utterance};

static VTT_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d{2,}:)?\d{2}:\d{2}\.\d{3}$").unwrap());
static SRT_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2,}:\d{2}:\d{2},\d{3}$").unwrap());

static SPEAKER_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"^([^:]+):\s*").unwrap(),
        Regex::new(r"^\[([^\]]+)\]\s*").unwrap(),
        Regex::new(r"^<([^>]+)>\s*").unwrap(),
    ]
});

/// `WEBVTT` alone on the first line, or followed by whitespace and a header comment
fn has_vtt_header(content: &str) -> bool {
    content
        .strip_prefix("WEBVTT")
        .is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', '\t', '\r', '\n']))
}

/// Parse a WebVTT document
pub fn parse_vtt(content: &str) -> Result<Vec<Utterance>> {
    let content = content.trim_start_matches('\u{feff}');
    if !has_vtt_header(content) {
        return Err(Error::Parse("missing WEBVTT header".to_string()));
    }

    let mut cues = Vec::new();
    // the first block is the header and its optional metadata lines
    for block in blocks(content).into_iter().skip(1) {
        let first = block[0];
        if first.starts_with("NOTE") || first.starts_with("STYLE") || first.starts_with("REGION") {
            continue;
        }
        cues.push(parse_cue(&block, &VTT_TIMESTAMP)?);
    }
    Ok(cues)
}

/// Parse a SubRip document
pub fn parse_srt(content: &str) -> Result<Vec<Utterance>> {
    let content = content.trim_start_matches('\u{feff}');
    blocks(content)
        .iter()
        .map(|block| parse_cue(block, &SRT_TIMESTAMP))
        .collect()
}

/// Best-effort speaker label from `Name:`, `[Name]` or `<Name>` prefixes, in that order
pub fn extract_speaker(text: &str) -> String {
    for pattern in SPEAKER_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            let name = caps[1].trim();
            return strip_voice_tag(name).to_string();
        }
    }
    UNKNOWN_SPEAKER.to_string()
}

/// `<v Alice>` and `<v.loud Alice>` carry the name after the tag class
fn strip_voice_tag(name: &str) -> &str {
    let is_voice = name.starts_with("v ") || name.starts_with("v.");
    match name.split_once(char::is_whitespace) {
        Some((_, rest)) if is_voice => rest.trim(),
        _ => name,
    }
}

/// Split into blank-line separated blocks of non-empty lines
fn blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// A cue is an optional identifier line, a timing line, then text lines
fn parse_cue(block: &[&str], timestamp: &Regex) -> Result<Utterance> {
    let timing_index = block
        .iter()
        .take(2)
        .position(|line| line.contains("-->"))
        .ok_or_else(|| Error::Parse(format!("cue without timing line: '{}'", block[0])))?;

    let (start, rest) = block[timing_index]
        .split_once("-->")
        .unwrap_or_default();
    let start = start.trim();
    // cue settings or SRT coordinates may follow the end timestamp
    let end = rest.split_whitespace().next().unwrap_or_default();

    for ts in [start, end] {
        if !timestamp.is_match(ts) {
            return Err(Error::Parse(format!("malformed timestamp '{}'", ts)));
        }
    }

    let text = block[timing_index + 1..].join("\n");
    let speaker = extract_speaker(&text);
    Ok(Utterance::timed(speaker, text, start, end))
}

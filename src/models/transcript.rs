use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Speaker label used when no speaker convention matches
pub const UNKNOWN_SPEAKER: &str = "Unknown";

/// Transcript container formats recognised by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptFormat {
    Txt,
    Json,
    Vtt,
    Srt,
}

impl TranscriptFormat {
    pub const ALL: [TranscriptFormat; 4] = [Self::Txt, Self::Json, Self::Vtt, Self::Srt];

    /// Select a format from a file extension (case-insensitive, leading dot allowed)
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "txt" => Ok(Self::Txt),
            "json" => Ok(Self::Json),
            "vtt" => Ok(Self::Vtt),
            "srt" => Ok(Self::Srt),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Json => "json",
            Self::Vtt => "vtt",
            Self::Srt => "srt",
        }
    }

    /// Metadata key holding the record count for this format
    pub fn count_key(&self) -> &'static str {
        match self {
            Self::Txt => "line_count",
            Self::Json => "entry_count",
            Self::Vtt => "caption_count",
            Self::Srt => "subtitle_count",
        }
    }
}

impl fmt::Display for TranscriptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (speaker, text) unit, with cue timing for caption formats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl Utterance {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            start: None,
            end: None,
        }
    }

    pub fn timed(
        speaker: impl Into<String>,
        text: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }
}

/// Normalized document produced by the parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTranscript {
    pub format: TranscriptFormat,
    /// Full concatenated text
    pub content: String,
    pub utterances: Vec<Utterance>,
    /// Format-specific metadata; always carries `filename` and the format's count key
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ParsedTranscript {
    pub fn filename(&self) -> &str {
        self.metadata
            .get("filename")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }

    pub fn record_count(&self) -> Option<u64> {
        self.metadata
            .get(self.format.count_key())
            .and_then(|v| v.as_u64())
    }

    /// Distinct speakers, sorted, excluding the unknown placeholder
    pub fn speakers(&self) -> BTreeSet<&str> {
        self.utterances
            .iter()
            .map(|u| u.speaker.as_str())
            .filter(|s| *s != UNKNOWN_SPEAKER)
            .collect()
    }

    /// Short human-readable overview of the transcript
    pub fn summary(&self) -> String {
        let mut summary = format!("Transcript: {}\n", self.filename());
        summary.push_str(&format!("Format: {}\n", self.format.as_str().to_uppercase()));

        if let Some(count) = self.record_count() {
            let label = match self.format {
                TranscriptFormat::Txt => "Lines",
                TranscriptFormat::Json => "Entries",
                TranscriptFormat::Vtt => "Captions",
                TranscriptFormat::Srt => "Subtitles",
            };
            summary.push_str(&format!("{}: {}\n", label, count));
        }

        let speakers = self.speakers();
        if !speakers.is_empty() {
            let names: Vec<&str> = speakers.into_iter().collect();
            summary.push_str(&format!("Speakers: {}\n", names.join(", ")));
        }

        let preview: String = self.content.chars().take(200).collect();
        summary.push_str(&format!("\nContent preview:\n{}...", preview));
        summary
    }
}

/// A transcript as persisted in the store
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub id: i64,
    pub filename: String,
    pub file_path: String,
    pub format: TranscriptFormat,
    pub content: String,
    pub utterances: Vec<Utterance>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(TranscriptFormat::from_extension("TXT").unwrap(), TranscriptFormat::Txt);
        assert_eq!(TranscriptFormat::from_extension(".srt").unwrap(), TranscriptFormat::Srt);
        assert!(matches!(
            TranscriptFormat::from_extension("docx"),
            Err(Error::UnsupportedFormat(ext)) if ext == "docx"
        ));
    }

    #[test]
    fn test_summary_lists_known_speakers() {
        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_string(), serde_json::json!("standup.txt"));
        metadata.insert("line_count".to_string(), serde_json::json!(3));
        let parsed = ParsedTranscript {
            format: TranscriptFormat::Txt,
            content: "Bob: hi\nAlice: hello\nnoise".to_string(),
            utterances: vec![
                Utterance::new("Bob", "hi"),
                Utterance::new("Alice", "hello"),
                Utterance::new(UNKNOWN_SPEAKER, "noise"),
            ],
            metadata,
        };

        let summary = parsed.summary();
        assert!(summary.starts_with("Transcript: standup.txt\nFormat: TXT\nLines: 3\n"));
        assert!(summary.contains("Speakers: Alice, Bob\n"));
    }
}

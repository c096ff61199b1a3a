use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::io::captions::{parse_srt, parse_vtt};
use crate::models::{ParsedTranscript, TranscriptFormat, UNKNOWN_SPEAKER, Utterance};

static SPEAKER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:]+):\s*(.+)$").unwrap());

/// Parse a transcript file, selecting the format from its extension
pub fn parse_transcript_file(path: &Path) -> Result<ParsedTranscript> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let format = TranscriptFormat::from_extension(ext)?;

    let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    debug!("Parsing {} as {}", filename, format);
    parse_transcript_str(format, &content, &filename)
}

/// Parse transcript text already in memory
pub fn parse_transcript_str(
    format: TranscriptFormat,
    content: &str,
    filename: &str,
) -> Result<ParsedTranscript> {
    let (text, utterances, count) = match format {
        TranscriptFormat::Txt => {
            let utterances = parse_plain_text(content);
            let text = content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            (text, utterances, content.lines().count())
        }
        TranscriptFormat::Json => {
            let (text, utterances) = parse_json(content)?;
            let count = utterances.len();
            (text, utterances, count)
        }
        TranscriptFormat::Vtt | TranscriptFormat::Srt => {
            let utterances = if format == TranscriptFormat::Vtt {
                parse_vtt(content)?
            } else {
                parse_srt(content)?
            };
            let text = utterances
                .iter()
                .map(|u| u.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let count = utterances.len();
            (text, utterances, count)
        }
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("filename".to_string(), Value::from(filename));
    metadata.insert(format.count_key().to_string(), Value::from(count));

    Ok(ParsedTranscript {
        format,
        content: text,
        utterances,
        metadata,
    })
}

/// One record per non-empty line; `Speaker: text` lines keep their speaker
fn parse_plain_text(content: &str) -> Vec<Utterance> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match SPEAKER_LINE.captures(line) {
            Some(caps) => Utterance::new(caps[1].trim(), caps[2].trim()),
            None => Utterance::new(UNKNOWN_SPEAKER, line),
        })
        .collect()
}

/// Accepts a top-level array, an object with a `transcript` array, or a single entry object
fn parse_json(content: &str) -> Result<(String, Vec<Utterance>)> {
    let data: Value = serde_json::from_str(content)
        .map_err(|e| Error::Parse(format!("invalid JSON: {}", e)))?;

    let entries: Vec<&Value> = match &data {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("transcript") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(_) => {
                return Err(Error::Parse(
                    "`transcript` field must be an array".to_string(),
                ));
            }
            None => vec![&data],
        },
        _ => return Err(Error::Parse("Invalid JSON structure".to_string())),
    };

    let utterances = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| json_entry(i, entry))
        .collect::<Result<Vec<_>>>()?;

    let text = utterances
        .iter()
        .map(|u| u.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    Ok((text, utterances))
}

fn json_entry(index: usize, entry: &Value) -> Result<Utterance> {
    let obj = entry
        .as_object()
        .ok_or_else(|| Error::Parse(format!("entry {} is not an object", index)))?;

    let text = obj
        .get("text")
        .and_then(Value::as_str)
        .or_else(|| obj.get("content").and_then(Value::as_str))
        .unwrap_or_default();
    let speaker = obj
        .get("speaker")
        .and_then(scalar_string)
        .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string());

    Ok(Utterance {
        speaker,
        text: text.to_string(),
        start: obj.get("start").and_then(scalar_string),
        end: obj.get("end").and_then(scalar_string),
    })
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

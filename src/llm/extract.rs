use std::sync::LazyLock;

use regex::Regex;

/// Used when the response carries no user-story block
pub const DEFAULT_DESCRIPTION: &str = "Generated from voice transcript";

const TITLE_MARKERS: [&str; 3] = ["Feature:", "Test Suite:", "# "];

static USER_STORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(As a .+?So that .+?)(?:\n|$)").unwrap());

/// First heading line in the response, with its marker stripped.
///
/// A heading with nothing after its marker yields `None`.
pub fn extract_title(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find_map(|line| {
            TITLE_MARKERS
                .iter()
                .find_map(|marker| line.strip_prefix(marker))
                .map(|rest| rest.trim_start_matches('#').trim().to_string())
        })
        .filter(|title| !title.is_empty())
}

/// The "As a ... So that ..." narrative, if present
pub fn extract_user_story(content: &str) -> Option<String> {
    USER_STORY
        .captures(content)
        .map(|caps| caps[1].trim().to_string())
}

pub fn fallback_title(filename: &str) -> String {
    format!("Test Script for {}", filename)
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Output format requested from the LLM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptFormat {
    /// Feature / Scenario / Given-When-Then
    Gherkin,
    /// Code-style test cases
    Pytest,
    /// Numbered manual steps with expected results
    Manual,
    /// Gherkin variant with scenario outlines
    Cucumber,
}

impl ScriptFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gherkin => "gherkin",
            Self::Pytest => "pytest",
            Self::Manual => "manual",
            Self::Cucumber => "cucumber",
        }
    }

    /// Whether bodies of this format are organised as `Scenario:` blocks
    pub fn is_scenario_based(&self) -> bool {
        matches!(self, Self::Gherkin | Self::Cucumber)
    }

    /// Extension used when writing a script of this format to disk
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Gherkin | Self::Cucumber => "feature",
            Self::Pytest => "py",
            Self::Manual => "md",
        }
    }
}

impl fmt::Display for ScriptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gherkin" => Ok(Self::Gherkin),
            "pytest" => Ok(Self::Pytest),
            "manual" => Ok(Self::Manual),
            "cucumber" => Ok(Self::Cucumber),
            other => Err(Error::ConfigurationInvalid(vec![format!(
                "Unsupported test script format: {}",
                other
            )])),
        }
    }
}

/// Approval lifecycle state; `Approved` and `Rejected` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Pending,
    Approved,
    Rejected,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DraftStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::Parse(format!("unknown draft status '{}'", other))),
        }
    }
}

/// Output of the draft generator, before persistence
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedDraft {
    pub title: String,
    pub description: String,
    /// Raw LLM response, unvalidated
    pub content: String,
    pub format: ScriptFormat,
    pub ai_provider: String,
    pub ai_model: String,
}

/// External ticket identifiers recorded on an approved draft
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketRef {
    pub story_id: String,
    pub story_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A persisted test-script draft
#[derive(Debug, Clone, Serialize)]
pub struct Draft {
    pub id: i64,
    pub transcript_id: i64,
    pub title: String,
    pub description: String,
    pub format: ScriptFormat,
    pub content: String,
    pub ai_provider: String,
    pub ai_model: String,
    pub status: DraftStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub ticket: Option<TicketRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_format_parse() {
        assert_eq!("Gherkin".parse::<ScriptFormat>().unwrap(), ScriptFormat::Gherkin);
        assert_eq!(" manual ".parse::<ScriptFormat>().unwrap(), ScriptFormat::Manual);
        assert!("cobol".parse::<ScriptFormat>().is_err());
        assert!(ScriptFormat::Cucumber.is_scenario_based());
        assert!(!ScriptFormat::Pytest.is_scenario_based());
        assert_eq!(ScriptFormat::Cucumber.file_extension(), "feature");
    }

    #[test]
    fn test_status_terminality() {
        assert!(!DraftStatus::Pending.is_terminal());
        assert!(DraftStatus::Approved.is_terminal());
        assert!(DraftStatus::Rejected.is_terminal());
        assert_eq!("rejected".parse::<DraftStatus>().unwrap(), DraftStatus::Rejected);
    }
}

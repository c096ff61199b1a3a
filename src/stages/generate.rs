use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::io::parse_transcript_file;
use crate::llm::{
    CompletionClient, DEFAULT_DESCRIPTION, build_generation_prompt, extract_title,
    extract_user_story, fallback_title,
};
use crate::models::{GeneratedDraft, ParsedTranscript, ScriptFormat};

/// Per-file result of a batch run
#[derive(Debug)]
pub struct BatchEntry {
    pub path: PathBuf,
    pub outcome: std::result::Result<GeneratedDraft, String>,
}

/// Turns a parsed transcript into a test-script draft with one provider call
pub struct DraftGenerator {
    client: Arc<dyn CompletionClient>,
    format: ScriptFormat,
}

impl DraftGenerator {
    pub fn new(client: Arc<dyn CompletionClient>, format: ScriptFormat) -> Self {
        Self { client, format }
    }

    /// Generate a draft; provider failures propagate unchanged
    pub async fn generate(
        &self,
        transcript: &ParsedTranscript,
        additional_context: Option<&str>,
    ) -> Result<GeneratedDraft> {
        let prompt = build_generation_prompt(transcript, self.format, additional_context);

        info!(
            "Generating {} script for {} with {}/{}",
            self.format,
            transcript.filename(),
            self.client.provider(),
            self.client.model()
        );
        let content = self.client.complete(&prompt).await?;

        let title = extract_title(&content).unwrap_or_else(|| fallback_title(transcript.filename()));
        let description =
            extract_user_story(&content).unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());

        Ok(GeneratedDraft {
            title,
            description,
            content,
            format: self.format,
            ai_provider: self.client.provider().to_string(),
            ai_model: self.client.model().to_string(),
        })
    }

    /// Parse and generate for each file in turn; failures are recorded per file
    pub async fn generate_batch(
        &self,
        paths: &[PathBuf],
        additional_context: Option<&str>,
    ) -> Vec<BatchEntry> {
        let mut entries = Vec::with_capacity(paths.len());

        for path in paths {
            let outcome = self
                .generate_file(path, additional_context)
                .await
                .map_err(|e| e.to_string());
            if let Err(e) = &outcome {
                warn!("Batch item {:?} failed: {}", path, e);
            }
            entries.push(BatchEntry {
                path: path.clone(),
                outcome,
            });
        }

        let succeeded = entries.iter().filter(|e| e.outcome.is_ok()).count();
        info!("Batch complete: {}/{} succeeded", succeeded, entries.len());
        entries
    }

    async fn generate_file(
        &self,
        path: &Path,
        additional_context: Option<&str>,
    ) -> Result<GeneratedDraft> {
        let parsed = parse_transcript_file(path)?;
        self.generate(&parsed, additional_context).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::Error;
    use crate::io::parse_transcript_str;
    use crate::models::TranscriptFormat;

    /// Returns a canned response and records every prompt it sees
    pub(crate) struct FakeCompletion {
        pub response: std::result::Result<String, String>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl FakeCompletion {
        pub(crate) fn replying(response: &str) -> Self {
            Self {
                response: Ok(response.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                response: Err(message.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for FakeCompletion {
        fn provider(&self) -> &str {
            "fake"
        }

        fn model(&self) -> &str {
            "fake-model"
        }

        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.response
                .clone()
                .map_err(|e| Error::provider("fake", e))
        }
    }

    fn transcript() -> ParsedTranscript {
        parse_transcript_str(
            TranscriptFormat::Txt,
            "PO: users must reset passwords by email",
            "reset.txt",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_generate_extracts_title_and_story() {
        let response = "Feature: Password reset\n  As a user\n  I want a reset link\n  So that I regain access\n\n  Scenario: link sent";
        let client = Arc::new(FakeCompletion::replying(response));
        let generator = DraftGenerator::new(client.clone(), ScriptFormat::Gherkin);

        let draft = generator
            .generate(&transcript(), Some("Mobile only"))
            .await
            .unwrap();

        assert_eq!(draft.title, "Password reset");
        assert!(draft.description.starts_with("As a user"));
        assert!(draft.description.ends_with("So that I regain access"));
        assert_eq!(draft.content, response);
        assert_eq!(draft.ai_provider, "fake");
        assert_eq!(draft.ai_model, "fake-model");

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("PO: users must reset passwords by email"));
        assert!(prompts[0].contains("FORMAT REQUIRED: GHERKIN"));
        assert!(prompts[0].contains("ADDITIONAL CONTEXT:\nMobile only"));
    }

    #[tokio::test]
    async fn test_generate_fallbacks() {
        let generator = DraftGenerator::new(
            Arc::new(FakeCompletion::replying("1. Open the app\n2. Tap reset")),
            ScriptFormat::Manual,
        );
        let draft = generator.generate(&transcript(), None).await.unwrap();

        assert_eq!(draft.title, "Test Script for reset.txt");
        assert_eq!(draft.description, DEFAULT_DESCRIPTION);
        assert_eq!(draft.format, ScriptFormat::Manual);
    }

    #[tokio::test]
    async fn test_empty_heading_falls_back_to_filename() {
        let generator = DraftGenerator::new(
            Arc::new(FakeCompletion::replying("Feature:\n  Scenario: reset link sent")),
            ScriptFormat::Gherkin,
        );
        let draft = generator.generate(&transcript(), None).await.unwrap();
        assert_eq!(draft.title, "Test Script for reset.txt");
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let generator = DraftGenerator::new(
            Arc::new(FakeCompletion::failing("rate limited")),
            ScriptFormat::Gherkin,
        );
        let result = generator.generate(&transcript(), None).await;
        assert!(matches!(result, Err(Error::ProviderCallFailed { .. })));
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("meeting.txt");
        std::fs::write(&good, "Alice: Hello").unwrap();
        let bad = dir.path().join("meeting.docx");
        std::fs::write(&bad, "binary").unwrap();
        let missing = dir.path().join("gone.json");

        let generator = DraftGenerator::new(
            Arc::new(FakeCompletion::replying("# Greeting tests")),
            ScriptFormat::Pytest,
        );
        let entries = generator
            .generate_batch(&[bad.clone(), good.clone(), missing], None)
            .await;

        assert_eq!(entries.len(), 3);
        assert!(entries[0].outcome.as_ref().unwrap_err().contains("docx"));
        assert_eq!(entries[1].path, good);
        assert_eq!(entries[1].outcome.as_ref().unwrap().title, "Greeting tests");
        assert!(entries[2].outcome.is_err());
    }
}

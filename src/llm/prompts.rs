use crate::models::{ParsedTranscript, ScriptFormat};

/// Structural contract the response is asked to follow, per output format
pub fn format_template(format: ScriptFormat) -> &'static str {
    match format {
        ScriptFormat::Gherkin => {
            r#"
Generate test scripts in Gherkin/BDD format with the following structure:
Feature: [Feature name]
  As a [role]
  I want [goal]
  So that [benefit]

  Scenario: [Scenario name]
    Given [precondition]
    When [action]
    Then [expected result]
"#
        }
        ScriptFormat::Pytest => {
            r#"
Generate test scripts in pytest format with the following structure:
```python
import pytest

class TestFeatureName:
    def test_scenario_name(self):
        # Arrange
        ...
        # Act
        ...
        # Assert
        assert expected_result
```
"#
        }
        ScriptFormat::Manual => {
            r#"
Generate manual test cases with the following structure:
Test Case ID: TC-XXX
Title: [Test case title]
Preconditions: [What needs to be set up]
Test Steps:
1. [Step 1]
2. [Step 2]
3. [Step 3]
Expected Results:
1. [Expected result for step 1]
2. [Expected result for step 2]
3. [Expected result for step 3]
"#
        }
        ScriptFormat::Cucumber => {
            r#"
Generate test scripts in Cucumber format similar to Gherkin with scenario outlines when needed.
"#
        }
    }
}

const INSTRUCTIONS: &str = r#"INSTRUCTIONS:
1. Carefully analyze the transcript to identify:
   - Features and functionalities discussed
   - User requirements and expectations
   - Edge cases and error scenarios
   - Acceptance criteria
   - Integration points

2. Generate comprehensive test scripts that cover:
   - Happy path scenarios
   - Negative test cases
   - Edge cases
   - Data validation
   - Error handling

3. Extract and include:
   - Feature title
   - User story (if applicable)
   - Test scenarios
   - Clear preconditions
   - Step-by-step test actions
   - Expected results

4. Make the test scripts:
   - Clear and unambiguous
   - Executable by any QA team member
   - Complete with all necessary details
   - Organized and well-structured
"#;

/// Build the single instruction prompt for a transcript
pub fn build_generation_prompt(
    transcript: &ParsedTranscript,
    format: ScriptFormat,
    additional_context: Option<&str>,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are an expert QA engineer and test script writer. Your task is to analyze a voice transcript\n",
    );
    prompt.push_str(
        "from a product discussion or requirements gathering session and generate comprehensive test scripts.\n\n",
    );

    prompt.push_str("TRANSCRIPT CONTENT:\n");
    prompt.push_str(&transcript.content);
    prompt.push_str("\n\n");

    prompt.push_str(&format!(
        "FORMAT REQUIRED: {}\n",
        format.as_str().to_uppercase()
    ));
    prompt.push_str(format_template(format));
    prompt.push('\n');

    prompt.push_str(INSTRUCTIONS);
    prompt.push('\n');

    if let Some(context) = additional_context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("\nADDITIONAL CONTEXT:\n");
        prompt.push_str(context);
        prompt.push('\n');
    }

    prompt.push_str("\nPlease generate the test scripts now.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::io::parse_transcript_str;
    use crate::models::TranscriptFormat;

    fn transcript() -> ParsedTranscript {
        parse_transcript_str(
            TranscriptFormat::Txt,
            "PO: Users must reset passwords by email",
            "reset.txt",
        )
        .unwrap()
    }

    #[test]
    fn test_prompt_embeds_transcript_and_template() {
        let prompt = build_generation_prompt(&transcript(), ScriptFormat::Manual, None);

        assert!(prompt.contains("TRANSCRIPT CONTENT:\nPO: Users must reset passwords by email\n"));
        assert!(prompt.contains("FORMAT REQUIRED: MANUAL\n"));
        assert!(prompt.contains("Test Case ID: TC-XXX"));
        assert!(!prompt.contains("ADDITIONAL CONTEXT"));
        assert!(prompt.ends_with("Please generate the test scripts now."));
    }

    #[test]
    fn test_prompt_appends_context_verbatim() {
        let prompt = build_generation_prompt(
            &transcript(),
            ScriptFormat::Gherkin,
            Some("Target the mobile app only"),
        );
        assert!(prompt.contains("\nADDITIONAL CONTEXT:\nTarget the mobile app only\n"));
        assert!(prompt.contains("Scenario: [Scenario name]"));
    }

    #[test]
    fn test_every_format_has_a_template() {
        for format in [
            ScriptFormat::Gherkin,
            ScriptFormat::Pytest,
            ScriptFormat::Manual,
            ScriptFormat::Cucumber,
        ] {
            assert!(!format_template(format).trim().is_empty());
        }
    }
}

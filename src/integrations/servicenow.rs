//! ServiceNow ticket filing.
//!
//! Every call returns an [`Outcome`] rather than an error so that a ticketing
//! outage never unwinds an approval that has already been recorded.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{Draft, Transcript};

const STORY_TABLE: &str = "rm_story";
const TEST_TABLE: &str = "sn_atf_test";
const SHORT_DESCRIPTION_LIMIT: usize = 160;

/// Result of a best-effort ticketing call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome<T> {
    Success(T),
    Failed { error: String },
}

impl<T> Outcome<T> {
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) => Self::Failed {
                error: e.to_string(),
            },
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failed { .. } => None,
        }
    }
}

/// Identifiers of a created story
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiledStory {
    pub story_id: String,
    pub story_number: Option<String>,
    pub story_link: String,
    pub created_at: DateTime<Utc>,
}

pub type TicketOutcome = Outcome<FiledStory>;

/// Raw record returned by the secondary table calls
pub type TicketCallOutcome = Outcome<Value>;

/// Creates an external work item for an approved draft
#[async_trait]
pub trait TicketFiler: Send + Sync {
    async fn create_story(&self, draft: &Draft, transcript: Option<&Transcript>) -> TicketOutcome;
}

#[derive(Debug, Clone)]
pub enum ServiceNowAuth {
    Basic { username: String, password: String },
    ClientCredentials { client_id: String, client_secret: String },
}

#[derive(Debug, Clone)]
pub struct ServiceNowConfig {
    /// Instance name (`dev123`) or full host (`dev123.service-now.com`)
    pub instance: String,
    pub auth: ServiceNowAuth,
}

impl ServiceNowConfig {
    pub fn host(&self) -> String {
        if self.instance.contains('.') {
            self.instance.clone()
        } else {
            format!("{}.service-now.com", self.instance)
        }
    }

    pub fn base_url(&self) -> String {
        format!("https://{}", self.host())
    }

    pub fn story_link(&self, sys_id: &str) -> String {
        format!("{}/{}.do?sys_id={}", self.base_url(), STORY_TABLE, sys_id)
    }
}

/// One test case derived from a script body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCaseSpec {
    pub name: String,
    pub description: String,
    pub script: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedTestCase {
    pub test_name: String,
    pub test_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCaseReport {
    /// True when at least one case was created
    pub success: bool,
    pub created_tests: Vec<CreatedTestCase>,
}

#[derive(Debug, Deserialize)]
struct TableResponse {
    result: Value,
}

#[derive(Debug, Deserialize)]
struct OAuthToken {
    access_token: String,
}

pub struct ServiceNowClient {
    client: Client,
    config: ServiceNowConfig,
    access_token: Mutex<Option<String>>,
}

impl ServiceNowClient {
    pub fn new(config: ServiceNowConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            access_token: Mutex::new(None),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/api/now/table/{}", self.config.base_url(), table)
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        match &self.config.auth {
            ServiceNowAuth::Basic { username, password } => {
                Ok(request.basic_auth(username, Some(password)))
            }
            ServiceNowAuth::ClientCredentials {
                client_id,
                client_secret,
            } => {
                let mut cached = self.access_token.lock().await;
                if cached.is_none() {
                    *cached = Some(self.fetch_token(client_id, client_secret).await?);
                }
                let token = cached.clone().unwrap_or_default();
                Ok(request.bearer_auth(token))
            }
        }
    }

    async fn fetch_token(&self, client_id: &str, client_secret: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/oauth_token.do", self.config.base_url()))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(|e| Error::provider("ServiceNow", e))?;
        let token: OAuthToken = read_json(response).await?;
        Ok(token.access_token)
    }

    async fn send_table(&self, request: RequestBuilder) -> Result<Value> {
        let response = self
            .authorize(request.header("Accept", "application/json"))
            .await?
            .send()
            .await
            .map_err(|e| Error::provider("ServiceNow", e))?;
        let body: TableResponse = read_json(response).await?;
        Ok(body.result)
    }

    async fn try_create_story(
        &self,
        draft: &Draft,
        transcript: Option<&Transcript>,
    ) -> Result<FiledStory> {
        let payload = build_story_payload(draft, transcript);
        let result = self
            .send_table(self.client.post(self.table_url(STORY_TABLE)).json(&payload))
            .await?;

        let story_id = result["sys_id"]
            .as_str()
            .ok_or_else(|| Error::provider("ServiceNow", "response missing sys_id"))?
            .to_string();
        Ok(FiledStory {
            story_link: self.config.story_link(&story_id),
            story_number: result["number"].as_str().map(str::to_string),
            story_id,
            created_at: Utc::now(),
        })
    }

    /// Patch fields on an existing story
    pub async fn update_story(&self, story_id: &str, updates: &Value) -> TicketCallOutcome {
        let url = format!("{}/{}", self.table_url(STORY_TABLE), story_id);
        Outcome::from_result(self.send_table(self.client.patch(url).json(updates)).await)
    }

    pub async fn get_story(&self, story_id: &str) -> TicketCallOutcome {
        let url = format!("{}/{}", self.table_url(STORY_TABLE), story_id);
        Outcome::from_result(self.send_table(self.client.get(url)).await)
    }

    /// Upload a file as an attachment on a story
    pub async fn attach_file(
        &self,
        story_id: &str,
        path: &Path,
        file_name: Option<&str>,
    ) -> TicketCallOutcome {
        let result: Result<Value> = async {
            let bytes = tokio::fs::read(path).await.map_err(|source| Error::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let file_name = file_name
                .map(str::to_string)
                .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "attachment".to_string());

            let request = self
                .client
                .post(format!("{}/api/now/attachment/file", self.config.base_url()))
                .query(&[
                    ("table_name", STORY_TABLE),
                    ("table_sys_id", story_id),
                    ("file_name", file_name.as_str()),
                ])
                .header("Content-Type", "application/octet-stream")
                .body(bytes);
            self.send_table(request).await
        }
        .await;
        Outcome::from_result(result)
    }

    /// Create one test record per case derived from the draft body
    pub async fn create_test_cases(&self, story_id: &str, draft: &Draft) -> TestCaseReport {
        let mut created_tests = Vec::new();

        for case in derive_test_cases(draft) {
            let payload = json!({
                "name": case.name,
                "description": case.description,
                "test_script": case.script,
                "story": story_id,
            });
            let result = self
                .send_table(self.client.post(self.table_url(TEST_TABLE)).json(&payload))
                .await;
            created_tests.push(match result {
                Ok(record) => CreatedTestCase {
                    test_name: case.name,
                    test_id: record["sys_id"].as_str().map(str::to_string),
                    error: None,
                },
                Err(e) => {
                    warn!("Test case '{}' not created: {}", case.name, e);
                    CreatedTestCase {
                        test_name: case.name,
                        test_id: None,
                        error: Some(e.to_string()),
                    }
                }
            });
        }

        TestCaseReport {
            success: created_tests.iter().any(|t| t.error.is_none()),
            created_tests,
        }
    }
}

#[async_trait]
impl TicketFiler for ServiceNowClient {
    async fn create_story(&self, draft: &Draft, transcript: Option<&Transcript>) -> TicketOutcome {
        let outcome = Outcome::from_result(self.try_create_story(draft, transcript).await);
        match &outcome {
            Outcome::Success(story) => info!(
                "Created story {} for test script {}",
                story.story_number.as_deref().unwrap_or(&story.story_id),
                draft.id
            ),
            Outcome::Failed { error } => {
                warn!("Story creation failed for test script {}: {}", draft.id, error)
            }
        }
        outcome
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::provider(
            "ServiceNow",
            format!("API error: {} - {}", status, body),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| Error::provider("ServiceNow", format!("invalid response: {}", e)))
}

/// Map a draft and its source transcript onto story fields
pub fn build_story_payload(draft: &Draft, transcript: Option<&Transcript>) -> Value {
    let mut description = format!("{}\n\n", draft.description);
    description.push_str("=== TEST SCRIPT ===\n");
    description.push_str(&draft.content);

    if let Some(transcript) = transcript {
        description.push_str("\n\n=== SOURCE TRANSCRIPT ===\n");
        description.push_str(&format!("File: {}\n", transcript.filename));
        description.push_str(&format!("Format: {}\n", transcript.format));
    }

    let short_description: String = draft.title.chars().take(SHORT_DESCRIPTION_LIMIT).collect();
    let mut payload = json!({
        "short_description": short_description,
        "description": description,
        "state": "draft",
        "priority": "3",
        "category": "feature",
        "u_test_format": draft.format.as_str(),
        "u_ai_generated": "true",
    });

    if let Some(transcript) = transcript {
        payload["u_source"] = json!("Voice Transcript");
        payload["u_transcript_file"] = json!(transcript.filename);
    }

    payload
}

/// Split a scenario-based body on `Scenario:`; other formats yield one case
pub fn derive_test_cases(draft: &Draft) -> Vec<TestCaseSpec> {
    if !draft.format.is_scenario_based() {
        return vec![TestCaseSpec {
            name: draft.title.clone(),
            description: draft.description.clone(),
            script: draft.content.clone(),
        }];
    }

    draft
        .content
        .split("Scenario:")
        .skip(1)
        .enumerate()
        .map(|(i, scenario)| {
            let body = scenario.trim();
            let name = body
                .lines()
                .next()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Test Case {}", i + 1));
            TestCaseSpec {
                description: format!("Scenario: {}", name),
                script: format!("Scenario: {}", body),
                name,
            }
        })
        .collect()
}

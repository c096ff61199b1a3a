//! Wiring shared by the CLI and the HTTP server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::integrations::{
    DisabledNotifier, Notifier, Outcome, SendGridNotifier, ServiceNowClient, TestCaseReport,
    TicketCallOutcome, TicketFiler, TicketOutcome,
};
use crate::io::parse_transcript_file;
use crate::llm::build_client;
use crate::models::{Draft, IssuedApproval, Transcript};
use crate::stages::{ApprovalPolicy, ApprovalWorkflow, DraftGenerator};
use crate::store::{Stats, Store};

const RECENT_DRAFTS: usize = 5;

/// Switches for a single transcript run
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub context: Option<String>,
    pub auto_approve: bool,
    pub create_story: bool,
}

/// Everything produced by one transcript run
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub transcript: Transcript,
    pub draft: Draft,
    pub approval: Option<IssuedApproval>,
    pub ticket: Option<TicketOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub app_name: String,
    pub stats: Stats,
    pub recent_drafts: Vec<Draft>,
}

pub struct App {
    settings: Settings,
    store: Arc<Store>,
    generator: Option<DraftGenerator>,
    workflow: ApprovalWorkflow,
    servicenow: Option<Arc<ServiceNowClient>>,
}

impl App {
    pub fn new(
        settings: Settings,
        store: Arc<Store>,
        generator: Option<DraftGenerator>,
        notifier: Arc<dyn Notifier>,
        filer: Option<Arc<dyn TicketFiler>>,
        servicenow: Option<Arc<ServiceNowClient>>,
    ) -> Self {
        let policy = ApprovalPolicy {
            recipient: settings.product_owner_email.clone(),
            base_url: settings.public_base_url.clone(),
            auto_file: settings.auto_create_story_on_approval,
        };
        let workflow = ApprovalWorkflow::new(store.clone(), notifier, filer, policy);
        Self {
            settings,
            store,
            generator,
            workflow,
            servicenow,
        }
    }

    /// Build every collaborator from configuration; missing credentials disable
    /// the matching integration instead of failing
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let store = Arc::new(Store::open(settings.database_path())?);

        let generator = match settings.llm_config() {
            Ok(config) => Some(DraftGenerator::new(
                Arc::from(build_client(config)),
                settings.script_format()?,
            )),
            Err(e) => {
                warn!("Draft generation disabled: {}", e);
                None
            }
        };

        let notifier: Arc<dyn Notifier> = match &settings.sendgrid_api_key {
            Some(key) => Arc::new(SendGridNotifier::new(
                key.clone(),
                settings.notification_email_from.clone(),
            )),
            None => Arc::new(DisabledNotifier),
        };

        let servicenow = settings
            .servicenow_config()
            .map(|config| Arc::new(ServiceNowClient::new(config)));
        let filer = servicenow
            .clone()
            .map(|client| client as Arc<dyn TicketFiler>);

        Ok(Self::new(settings, store, generator, notifier, filer, servicenow))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn workflow(&self) -> &ApprovalWorkflow {
        &self.workflow
    }

    pub fn generator(&self) -> Result<&DraftGenerator> {
        self.generator.as_ref().ok_or_else(|| {
            Error::ConfigurationInvalid(vec![format!(
                "No API key configured for AI provider {}",
                self.settings.ai_provider
            )])
        })
    }

    /// Parse, generate, persist, then route through approval or straight to filing.
    ///
    /// Nothing is stored when parsing or generation fails.
    pub async fn process_transcript(
        &self,
        path: &Path,
        options: &ProcessOptions,
    ) -> Result<ProcessReport> {
        let parsed = parse_transcript_file(path)?;
        info!(
            "Loaded {} transcript with {} records",
            parsed.format,
            parsed.utterances.len()
        );

        let generated = self
            .generator()?
            .generate(&parsed, options.context.as_deref())
            .await?;

        let now = Utc::now();
        let filename = parsed.filename().to_string();
        let file_path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let skip_approval = options.auto_approve || !self.settings.approval_required;
        let (transcript, draft) = self.store.insert_transcript_with_draft(
            &parsed,
            &filename,
            &file_path.to_string_lossy(),
            &generated,
            skip_approval,
            now,
        )?;
        info!("Test script {} saved as {}", draft.id, draft.status);

        let approval = if skip_approval {
            None
        } else {
            Some(self.workflow.request(draft.id, "system").await?)
        };

        let ticket = if skip_approval && options.create_story {
            Some(
                self.workflow
                    .file_ticket(draft.id)
                    .await
                    .unwrap_or_else(|e| Outcome::failed(e.to_string())),
            )
        } else {
            None
        };

        Ok(ProcessReport {
            transcript,
            draft: self.store.draft(draft.id)?,
            approval,
            ticket,
        })
    }

    pub fn dashboard(&self) -> Result<Dashboard> {
        Ok(Dashboard {
            app_name: self.settings.app_name.clone(),
            stats: self.store.stats()?,
            recent_drafts: self.store.list_drafts(None, RECENT_DRAFTS)?,
        })
    }

    /// Where an uploaded file with this name is kept
    pub fn upload_path(&self, filename: &str) -> PathBuf {
        self.settings.upload_dir.join(filename)
    }

    fn filed_story(&self, draft_id: i64) -> Result<(&ServiceNowClient, String)> {
        let client = self.servicenow.as_deref().ok_or_else(|| {
            Error::ConfigurationInvalid(vec!["ServiceNow is not configured".to_string()])
        })?;
        let draft = self.store.draft(draft_id)?;
        let ticket = draft.ticket.ok_or_else(|| {
            Error::InvalidTransition(format!("test script {} has no story yet", draft_id))
        })?;
        Ok((client, ticket.story_id))
    }

    pub async fn story(&self, draft_id: i64) -> Result<TicketCallOutcome> {
        let (client, story_id) = self.filed_story(draft_id)?;
        Ok(client.get_story(&story_id).await)
    }

    pub async fn update_story_state(&self, draft_id: i64, state: &str) -> Result<TicketCallOutcome> {
        let (client, story_id) = self.filed_story(draft_id)?;
        Ok(client.update_story(&story_id, &json!({ "state": state })).await)
    }

    pub async fn attach_to_story(&self, draft_id: i64, path: &Path) -> Result<TicketCallOutcome> {
        let (client, story_id) = self.filed_story(draft_id)?;
        Ok(client.attach_file(&story_id, path, None).await)
    }

    pub async fn create_test_cases(&self, draft_id: i64) -> Result<TestCaseReport> {
        let (client, story_id) = self.filed_story(draft_id)?;
        let draft = self.store.draft(draft_id)?;
        Ok(client.create_test_cases(&story_id, &draft).await)
    }
}

pub mod app;
pub mod config;
pub mod error;
pub mod integrations;
pub mod io;
pub mod llm;
pub mod models;
pub mod server;
pub mod stages;
pub mod store;

pub use app::{App, Dashboard, ProcessOptions, ProcessReport};
pub use config::Settings;
pub use error::{Error, Result};
pub use integrations::{Outcome, ServiceNowClient, TicketFiler, TicketOutcome};
pub use io::{parse_transcript_file, parse_transcript_str};
pub use llm::{CompletionClient, LlmConfig, LlmProvider, build_client};
pub use models::{
    ApprovalRequest, ApprovalStatus, Decision, Draft, DraftStatus, ParsedTranscript, ScriptFormat,
    Transcript, TranscriptFormat, Utterance,
};
pub use stages::{ApprovalPolicy, ApprovalWorkflow, DraftGenerator, Resolution};
pub use store::{Stats, Store};

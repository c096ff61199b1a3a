//! Draft approval lifecycle.
//!
//! A draft starts `pending` and leaves it exactly once, either through an
//! emailed token ([`ApprovalWorkflow::resolve`]) or an operator decision by id
//! ([`ApprovalWorkflow::decide`]). Tokens are never deleted; replays are
//! rejected because the request already carries a response, and only the
//! newest request for a draft can be acted on.

use std::sync::Arc;

use base64::prelude::*;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::integrations::{Notifier, Outcome, TicketFiler, TicketOutcome, compose_approval_email};
use crate::models::{
    ApprovalRequest, ApprovalStatus, Decision, Draft, DraftStatus, IssuedApproval, token_ttl,
};
use crate::store::{Store, is_constraint_violation};

const TOKEN_BYTES: usize = 32;
const TOKEN_ATTEMPTS: usize = 3;

/// Approver recorded for token resolutions when no product owner is configured
pub const LINK_APPROVER: &str = "approval-link";

#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    /// Who receives approval emails
    pub recipient: Option<String>,
    /// Base for the links embedded in emails
    pub base_url: String,
    /// File a ticket as soon as a draft is approved
    pub auto_file: bool,
}

impl ApprovalPolicy {
    pub fn link_approver(&self) -> &str {
        self.recipient.as_deref().unwrap_or(LINK_APPROVER)
    }
}

/// Outcome of a decision, with the ticket result when filing was attempted
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub decision: Decision,
    pub draft: Draft,
    pub ticket: Option<TicketOutcome>,
}

/// A request and its draft, for read-only viewing through a token
#[derive(Debug, Clone, Serialize)]
pub struct Review {
    pub request: ApprovalRequest,
    pub draft: Draft,
}

pub struct ApprovalWorkflow {
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
    filer: Option<Arc<dyn TicketFiler>>,
    policy: ApprovalPolicy,
}

impl ApprovalWorkflow {
    pub fn new(
        store: Arc<Store>,
        notifier: Arc<dyn Notifier>,
        filer: Option<Arc<dyn TicketFiler>>,
        policy: ApprovalPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            filer,
            policy,
        }
    }

    /// Issue a token for a pending draft and try to email it; the draft stays as it is
    pub async fn request(&self, draft_id: i64, requested_by: &str) -> Result<IssuedApproval> {
        self.request_at(draft_id, requested_by, Utc::now()).await
    }

    pub async fn request_at(
        &self,
        draft_id: i64,
        requested_by: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedApproval> {
        let draft = self.store.draft(draft_id)?;
        if draft.status.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "test script {} is already {}",
                draft_id, draft.status
            )));
        }
        let request = self.insert_request(draft_id, requested_by, now)?;
        info!(
            "Approval request {} created for test script {}",
            request.id, draft_id
        );

        let email_sent = self.notify(&draft, &request).await;

        Ok(IssuedApproval {
            approval_request_id: request.id,
            approval_token: request.token,
            expires_at: request.token_expires_at,
            email_sent,
        })
    }

    fn insert_request(
        &self,
        draft_id: i64,
        requested_by: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest> {
        let expires_at = now + token_ttl();
        let mut attempt = 1;
        loop {
            let token = generate_token();
            match self
                .store
                .insert_approval_request(draft_id, requested_by, &token, now, expires_at)
            {
                Err(e) if is_constraint_violation(&e) && attempt < TOKEN_ATTEMPTS => {
                    warn!("Approval token collision, regenerating");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Send the approval email; failures are logged and reported as `false`
    async fn notify(&self, draft: &Draft, request: &ApprovalRequest) -> bool {
        let Some(recipient) = self.policy.recipient.as_deref() else {
            warn!("No approval recipient configured; email not sent");
            return false;
        };

        let email = compose_approval_email(recipient, draft, request, &self.policy.base_url);
        match self.notifier.send(&email).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_email_sent(request.id, Utc::now()) {
                    warn!("Email sent but not recorded for request {}: {}", request.id, e);
                    return false;
                }
                info!("Approval email sent to {}", recipient);
                true
            }
            Err(e) => {
                warn!("Approval email for request {} failed: {}", request.id, e);
                false
            }
        }
    }

    /// Act on an emailed token
    pub async fn resolve(
        &self,
        token: &str,
        approved: bool,
        note: Option<&str>,
    ) -> Result<Resolution> {
        self.resolve_at(token, approved, note, Utc::now()).await
    }

    pub async fn resolve_at(
        &self,
        token: &str,
        approved: bool,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let request = self.actionable_request(token, now)?;
        if request.is_resolved() {
            return Err(Error::AlreadyResolved);
        }

        let decision = Decision::from_approved(approved);
        self.store
            .resolve_request(&request, decision, note, self.policy.link_approver(), now)?;
        info!(
            "Test script {} {} via approval request {}",
            request.draft_id, decision, request.id
        );

        self.finish(request.draft_id, decision).await
    }

    /// View a draft through its token without changing anything
    pub fn review(&self, token: &str) -> Result<Review> {
        self.review_at(token, Utc::now())
    }

    pub fn review_at(&self, token: &str, now: DateTime<Utc>) -> Result<Review> {
        let request = self.actionable_request(token, now)?;
        let draft = self.store.draft(request.draft_id)?;
        Ok(Review { request, draft })
    }

    fn actionable_request(&self, token: &str, now: DateTime<Utc>) -> Result<ApprovalRequest> {
        let request = self
            .store
            .approval_request_by_token(token)?
            .ok_or(Error::InvalidToken)?;
        if request.is_expired_at(now) {
            return Err(Error::TokenExpired);
        }
        if self.store.latest_request_id(request.draft_id)? != Some(request.id) {
            return Err(Error::Superseded);
        }
        Ok(request)
    }

    /// Operator decision by draft id, bypassing tokens
    pub async fn decide(
        &self,
        draft_id: i64,
        approved: bool,
        approver: &str,
        note: Option<&str>,
    ) -> Result<Resolution> {
        let decision = Decision::from_approved(approved);
        self.store
            .decide_draft(draft_id, decision, approver, note, Utc::now())?;
        info!("Test script {} {} by {}", draft_id, decision, approver);

        self.finish(draft_id, decision).await
    }

    async fn finish(&self, draft_id: i64, decision: Decision) -> Result<Resolution> {
        let ticket = if decision == Decision::Approved && self.policy.auto_file {
            Some(
                self.file_ticket(draft_id)
                    .await
                    .unwrap_or_else(|e| Outcome::failed(e.to_string())),
            )
        } else {
            None
        };

        Ok(Resolution {
            decision,
            draft: self.store.draft(draft_id)?,
            ticket,
        })
    }

    /// File a ticket for an approved draft and record its identifiers once
    pub async fn file_ticket(&self, draft_id: i64) -> Result<TicketOutcome> {
        let draft = self.store.draft(draft_id)?;
        if draft.status != DraftStatus::Approved {
            return Err(Error::InvalidTransition(format!(
                "test script {} is {}, only approved scripts are filed",
                draft_id, draft.status
            )));
        }
        if let Some(ticket) = &draft.ticket {
            return Ok(Outcome::failed(format!(
                "test script {} is already linked to story {}",
                draft_id, ticket.story_id
            )));
        }
        let Some(filer) = &self.filer else {
            warn!("Ticket filing skipped for test script {}: no filer configured", draft_id);
            return Ok(Outcome::failed("ServiceNow client not configured"));
        };

        let transcript = match self.store.transcript(draft.transcript_id) {
            Ok(transcript) => Some(transcript),
            Err(e) => {
                warn!("Filing without source transcript: {}", e);
                None
            }
        };

        let outcome = filer.create_story(&draft, transcript.as_ref()).await;
        if let Some(story) = outcome.success() {
            let recorded = self.store.record_ticket(
                draft_id,
                &story.story_id,
                story.story_number.as_deref(),
                story.created_at,
            )?;
            if !recorded {
                warn!(
                    "Story {} created but test script {} already had a ticket",
                    story.story_id, draft_id
                );
            }
        }
        Ok(outcome)
    }

    /// Current status with every approval request, most recent first
    pub fn status(&self, draft_id: i64) -> Result<ApprovalStatus> {
        let draft = self.store.draft(draft_id)?;
        let approval_requests = self.store.approval_requests_for_draft(draft_id)?;
        Ok(ApprovalStatus {
            draft_id,
            status: draft.status,
            approved_at: draft.approved_at,
            approved_by: draft.approved_by,
            rejection_reason: draft.rejection_reason,
            approval_requests,
        })
    }
}

/// 32 random bytes, URL-safe base64 without padding
pub fn generate_token() -> String {
    let mut bytes = [0_u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration;

    use crate::integrations::{ApprovalEmail, FiledStory};
    use crate::models::Transcript;
    use crate::store::tests::seeded;

    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub sent: Mutex<Vec<ApprovalEmail>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, email: &ApprovalEmail) -> Result<()> {
            if self.fail {
                return Err(Error::provider("fake-mail", "unreachable"));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct CountingFiler {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    #[async_trait]
    impl TicketFiler for CountingFiler {
        async fn create_story(&self, draft: &Draft, transcript: Option<&Transcript>) -> TicketOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert!(transcript.is_some());
            if self.fail {
                return Outcome::failed("ServiceNow API error: 503");
            }
            Outcome::Success(FiledStory {
                story_id: format!("sys{}", n),
                story_number: Some(format!("STRY000{}", n)),
                story_link: format!("https://dev.service-now.com/rm_story.do?sys_id=sys{}", n),
                created_at: draft.updated_at,
            })
        }
    }

    fn policy(auto_file: bool) -> ApprovalPolicy {
        ApprovalPolicy {
            recipient: Some("po@example.com".into()),
            base_url: "http://qa.local".into(),
            auto_file,
        }
    }

    struct Harness {
        workflow: ApprovalWorkflow,
        store: Arc<Store>,
        notifier: Arc<RecordingNotifier>,
        filer: Arc<CountingFiler>,
        draft: Draft,
    }

    fn harness(policy: ApprovalPolicy, notifier: RecordingNotifier, filer: CountingFiler) -> Harness {
        let (store, draft) = seeded();
        let store = Arc::new(store);
        let notifier = Arc::new(notifier);
        let filer = Arc::new(filer);
        let workflow = ApprovalWorkflow::new(
            store.clone(),
            notifier.clone(),
            Some(filer.clone() as Arc<dyn TicketFiler>),
            policy,
        );
        Harness {
            workflow,
            store,
            notifier,
            filer,
            draft,
        }
    }

    fn default_harness() -> Harness {
        harness(policy(true), RecordingNotifier::default(), CountingFiler::default())
    }

    #[test]
    fn test_tokens_are_url_safe_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_request_then_approve_files_exactly_once() {
        let h = default_harness();
        let now = Utc::now();

        let issued = h.workflow.request_at(h.draft.id, "system", now).await.unwrap();
        assert!(issued.email_sent);
        assert_eq!(issued.expires_at, now + Duration::days(7));
        assert_eq!(h.store.draft(h.draft.id).unwrap().status, DraftStatus::Pending);

        let sent = h.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html.contains(&issued.approval_token));

        let resolution = h
            .workflow
            .resolve(&issued.approval_token, true, None)
            .await
            .unwrap();

        assert_eq!(resolution.draft.status, DraftStatus::Approved);
        assert_eq!(resolution.draft.approved_by.as_deref(), Some("po@example.com"));
        assert!(resolution.draft.approved_at.is_some());
        assert!(resolution.ticket.as_ref().unwrap().is_success());
        assert_eq!(h.filer.calls.load(Ordering::SeqCst), 1);

        let stored = h.store.draft(h.draft.id).unwrap();
        assert_eq!(stored.ticket.unwrap().story_number.as_deref(), Some("STRY0001"));
    }

    #[tokio::test]
    async fn test_replay_is_already_resolved() {
        let h = default_harness();
        let issued = h.workflow.request(h.draft.id, "system").await.unwrap();

        h.workflow
            .resolve(&issued.approval_token, false, Some("too vague"))
            .await
            .unwrap();
        let replay = h.workflow.resolve(&issued.approval_token, true, None).await;

        assert!(matches!(replay, Err(Error::AlreadyResolved)));
        let draft = h.store.draft(h.draft.id).unwrap();
        assert_eq!(draft.status, DraftStatus::Rejected);
        assert_eq!(draft.rejection_reason.as_deref(), Some("too vague"));
        assert_eq!(h.filer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_changes_nothing() {
        let h = default_harness();
        let issued_at = Utc::now() - Duration::days(8);
        let issued = h
            .workflow
            .request_at(h.draft.id, "system", issued_at)
            .await
            .unwrap();

        let result = h.workflow.resolve(&issued.approval_token, true, None).await;
        assert!(matches!(result, Err(Error::TokenExpired)));
        assert!(matches!(
            h.workflow.review(&issued.approval_token),
            Err(Error::TokenExpired)
        ));

        let request = h.store.approval_request(issued.approval_request_id).unwrap();
        assert!(!request.is_resolved());
        assert_eq!(h.store.draft(h.draft.id).unwrap().status, DraftStatus::Pending);
    }

    #[tokio::test]
    async fn test_expired_check_precedes_resolved_check() {
        let h = default_harness();
        let now = Utc::now();
        let issued = h.workflow.request_at(h.draft.id, "system", now).await.unwrap();
        h.workflow
            .resolve_at(&issued.approval_token, true, None, now)
            .await
            .unwrap();

        let later = now + Duration::days(8);
        let result = h
            .workflow
            .resolve_at(&issued.approval_token, true, None, later)
            .await;
        assert!(matches!(result, Err(Error::TokenExpired)));
    }

    #[tokio::test]
    async fn test_fabricated_token_is_invalid() {
        let h = default_harness();
        let before = h.store.stats().unwrap();

        let result = h.workflow.resolve("not-a-real-token", true, None).await;
        assert!(matches!(result, Err(Error::InvalidToken)));
        assert!(matches!(h.workflow.review("nope"), Err(Error::InvalidToken)));
        assert_eq!(h.store.stats().unwrap(), before);
    }

    #[tokio::test]
    async fn test_email_failure_keeps_request() {
        let h = harness(
            policy(true),
            RecordingNotifier {
                fail: true,
                ..Default::default()
            },
            CountingFiler::default(),
        );
        let issued = h.workflow.request(h.draft.id, "system").await.unwrap();
        assert!(!issued.email_sent);

        let request = h.store.approval_request(issued.approval_request_id).unwrap();
        assert!(!request.email_sent);
        assert!(
            h.workflow
                .resolve(&issued.approval_token, true, None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_no_recipient_uses_link_approver() {
        let h = harness(
            ApprovalPolicy {
                recipient: None,
                ..policy(false)
            },
            RecordingNotifier::default(),
            CountingFiler::default(),
        );
        let issued = h.workflow.request(h.draft.id, "system").await.unwrap();
        assert!(!issued.email_sent);
        assert!(h.notifier.sent.lock().unwrap().is_empty());

        let resolution = h
            .workflow
            .resolve(&issued.approval_token, true, None)
            .await
            .unwrap();
        assert_eq!(resolution.draft.approved_by.as_deref(), Some(LINK_APPROVER));
        assert!(resolution.ticket.is_none());
    }

    #[tokio::test]
    async fn test_ticket_failure_does_not_roll_back_approval() {
        let h = harness(
            policy(true),
            RecordingNotifier::default(),
            CountingFiler {
                fail: true,
                ..Default::default()
            },
        );
        let resolution = h.workflow.decide(h.draft.id, true, "lead", None).await.unwrap();

        assert_eq!(resolution.draft.status, DraftStatus::Approved);
        assert!(!resolution.ticket.unwrap().is_success());
        let draft = h.store.draft(h.draft.id).unwrap();
        assert_eq!(draft.status, DraftStatus::Approved);
        assert!(draft.ticket.is_none());
    }

    #[tokio::test]
    async fn test_decide_on_terminal_draft_is_rejected() {
        let h = default_harness();
        h.workflow
            .decide(h.draft.id, false, "lead", Some("duplicate"))
            .await
            .unwrap();

        let again = h.workflow.decide(h.draft.id, true, "lead", None).await;
        assert!(matches!(again, Err(Error::InvalidTransition(_))));
        assert_eq!(h.store.draft(h.draft.id).unwrap().status, DraftStatus::Rejected);

        let missing = h.workflow.decide(999, true, "lead", None).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_request_on_decided_draft_is_rejected() {
        let h = default_harness();
        h.workflow.decide(h.draft.id, true, "lead", None).await.unwrap();

        let result = h.workflow.request(h.draft.id, "system").await;
        assert!(matches!(result, Err(Error::InvalidTransition(_))));
        assert!(h.store.approval_requests_for_draft(h.draft.id).unwrap().is_empty());
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_ticket_only_once() {
        let h = harness(policy(false), RecordingNotifier::default(), CountingFiler::default());
        assert!(matches!(
            h.workflow.file_ticket(h.draft.id).await,
            Err(Error::InvalidTransition(_))
        ));

        h.workflow.decide(h.draft.id, true, "lead", None).await.unwrap();
        assert!(h.workflow.file_ticket(h.draft.id).await.unwrap().is_success());
        assert!(!h.workflow.file_ticket(h.draft.id).await.unwrap().is_success());
        assert_eq!(h.filer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_lists_requests_newest_first() {
        let h = default_harness();
        let now = Utc::now();
        let first = h
            .workflow
            .request_at(h.draft.id, "system", now - Duration::hours(1))
            .await
            .unwrap();
        let second = h.workflow.request_at(h.draft.id, "system", now).await.unwrap();

        let status = h.workflow.status(h.draft.id).unwrap();
        assert_eq!(status.status, DraftStatus::Pending);
        let ids: Vec<i64> = status.approval_requests.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.approval_request_id, first.approval_request_id]);
        assert_ne!(first.approval_token, second.approval_token);
    }

    #[tokio::test]
    async fn test_rerequest_retires_older_token() {
        let h = default_harness();
        let now = Utc::now();
        let older = h
            .workflow
            .request_at(h.draft.id, "system", now - Duration::hours(1))
            .await
            .unwrap();
        let newer = h.workflow.request_at(h.draft.id, "system", now).await.unwrap();

        let result = h.workflow.resolve(&older.approval_token, true, None).await;
        assert!(matches!(result, Err(Error::Superseded)));
        assert!(matches!(
            h.workflow.review(&older.approval_token),
            Err(Error::Superseded)
        ));
        assert_eq!(h.store.draft(h.draft.id).unwrap().status, DraftStatus::Pending);
        assert!(!h.store.approval_request(older.approval_request_id).unwrap().is_resolved());
        assert_eq!(h.filer.calls.load(Ordering::SeqCst), 0);

        let resolution = h
            .workflow
            .resolve(&newer.approval_token, true, None)
            .await
            .unwrap();
        assert_eq!(resolution.draft.status, DraftStatus::Approved);
    }

    #[tokio::test]
    async fn test_review_reads_without_mutation() {
        let h = default_harness();
        let issued = h.workflow.request(h.draft.id, "system").await.unwrap();

        let review = h.workflow.review(&issued.approval_token).unwrap();
        assert_eq!(review.draft.id, h.draft.id);
        assert!(!review.request.is_resolved());
        assert_eq!(h.store.draft(h.draft.id).unwrap().status, DraftStatus::Pending);
    }
}

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{ApprovalRequest, Draft};

const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";
const PREVIEW_CHARS: usize = 500;

/// A rendered approval notification
#[derive(Debug, Clone)]
pub struct ApprovalEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Transactional email delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &ApprovalEmail) -> Result<()>;
}

/// SendGrid v3 mail sender
pub struct SendGridNotifier {
    client: Client,
    api_key: String,
    from: String,
}

impl SendGridNotifier {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn send(&self, email: &ApprovalEmail) -> Result<()> {
        let body = json!({
            "personalizations": [{ "to": [{ "email": email.to }] }],
            "from": { "email": self.from },
            "subject": email.subject,
            "content": [{ "type": "text/html", "value": email.html }],
        });

        let response = self
            .client
            .post(SENDGRID_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::provider("SendGrid", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                "SendGrid",
                format!("API error: {} - {}", status, text),
            ));
        }

        debug!("Approval email accepted with status {}", response.status());
        Ok(())
    }
}

/// Stand-in used when no email provider is configured; every send fails
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, _email: &ApprovalEmail) -> Result<()> {
        Err(Error::provider("Email", "email client not configured"))
    }
}

pub fn approve_link(base_url: &str, token: &str) -> String {
    format!("{}/approve/{}?action=approve", base_url.trim_end_matches('/'), token)
}

pub fn reject_link(base_url: &str, token: &str) -> String {
    format!("{}/approve/{}?action=reject", base_url.trim_end_matches('/'), token)
}

pub fn view_link(base_url: &str, draft_id: i64) -> String {
    format!("{}/test-script/{}", base_url.trim_end_matches('/'), draft_id)
}

/// Render the approval request email for a draft
pub fn compose_approval_email(
    to: &str,
    draft: &Draft,
    request: &ApprovalRequest,
    base_url: &str,
) -> ApprovalEmail {
    let approve_url = approve_link(base_url, &request.token);
    let reject_url = reject_link(base_url, &request.token);
    let view_url = view_link(base_url, draft.id);
    let preview: String = draft.content.chars().take(PREVIEW_CHARS).collect();

    let html = format!(
        r#"<html>
<body>
    <h2>Test Script Approval Request</h2>

    <p>A new test script has been generated and requires your approval.</p>

    <h3>Test Script Details:</h3>
    <ul>
        <li><strong>Title:</strong> {title}</li>
        <li><strong>Format:</strong> {format}</li>
        <li><strong>Generated:</strong> {created}</li>
        <li><strong>AI Model:</strong> {model}</li>
    </ul>

    <h3>Description:</h3>
    <p>{description}</p>

    <h3>Test Script Preview:</h3>
    <pre style="background: #f4f4f4; padding: 10px; border-radius: 5px;">
{preview}...
    </pre>

    <h3>Actions:</h3>
    <p>
        <a href="{approve_url}" style="background: #28a745; color: white; padding: 10px 20px; text-decoration: none; border-radius: 5px;">Approve</a>
        &nbsp;&nbsp;
        <a href="{reject_url}" style="background: #dc3545; color: white; padding: 10px 20px; text-decoration: none; border-radius: 5px;">Reject</a>
    </p>

    <p>Or review the full details at: <a href="{view_url}">{view_url}</a></p>

    <p><small>This link will expire on {expires}</small></p>
</body>
</html>
"#,
        title = escape_html(&draft.title),
        format = draft.format,
        created = draft.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        model = escape_html(&draft.ai_model),
        description = escape_html(&draft.description),
        preview = escape_html(&preview),
        approve_url = approve_url,
        reject_url = reject_url,
        view_url = view_url,
        expires = request.token_expires_at.format("%Y-%m-%d %H:%M UTC"),
    );

    ApprovalEmail {
        to: to.to_string(),
        subject: format!("Approval Required: {}", draft.title),
        html,
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};

    use crate::models::{DraftStatus, ScriptFormat, token_ttl};

    #[test]
    fn test_compose_approval_email() {
        let created = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let draft = Draft {
            id: 42,
            transcript_id: 1,
            title: "Cart <discounts>".into(),
            description: "As a shopper So that I save".into(),
            format: ScriptFormat::Gherkin,
            content: "x".repeat(600),
            ai_provider: "anthropic".into(),
            ai_model: "claude".into(),
            status: DraftStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            ticket: None,
            created_at: created,
            updated_at: created,
        };
        let request = ApprovalRequest {
            id: 1,
            draft_id: 42,
            requested_by: "system".into(),
            requested_at: created,
            token: "abc_-123".into(),
            token_expires_at: created + token_ttl(),
            email_sent: false,
            email_sent_at: None,
            responded_at: None,
            response: None,
            response_note: None,
        };

        let email = compose_approval_email("po@example.com", &draft, &request, "http://qa.local/");

        assert_eq!(email.to, "po@example.com");
        assert_eq!(email.subject, "Approval Required: Cart <discounts>");
        assert!(email.html.contains("http://qa.local/approve/abc_-123?action=approve"));
        assert!(email.html.contains("http://qa.local/approve/abc_-123?action=reject"));
        assert!(email.html.contains("http://qa.local/test-script/42"));
        assert!(email.html.contains("Cart &lt;discounts&gt;"));
        assert!(email.html.contains("expire on 2026-01-09 03:04 UTC"));
        assert!(email.html.contains(&format!("{}...", "x".repeat(500))));
        assert!(!email.html.contains(&"x".repeat(501)));
    }

    #[tokio::test]
    async fn test_disabled_notifier_fails() {
        let email = ApprovalEmail {
            to: "a@b.c".into(),
            subject: "s".into(),
            html: "h".into(),
        };
        assert!(matches!(
            DisabledNotifier.send(&email).await,
            Err(Error::ProviderCallFailed { .. })
        ));
    }
}

use std::path::Path;

use crate::error::{Error, Result};
use crate::models::{ApprovalStatus, Draft};

/// Write a generated script body to disk, creating parent directories
pub fn write_script(path: &Path, content: &str) -> Result<()> {
    let io_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, content).map_err(io_err)
}

/// Fixed-width table of drafts for terminal listing
pub fn format_draft_table(drafts: &[Draft]) -> String {
    let mut output = format!("Test Scripts ({})\n", drafts.len());
    output.push_str(&format!(
        "{:<6} {:<50} {:<9} {:<9} {:<17} {}\n",
        "ID", "Title", "Format", "Status", "Created", "Ticket"
    ));

    for draft in drafts {
        let ticket = draft
            .ticket
            .as_ref()
            .and_then(|t| t.story_number.as_deref())
            .unwrap_or("-");
        output.push_str(&format!(
            "{:<6} {:<50} {:<9} {:<9} {:<17} {}\n",
            draft.id,
            truncate(&draft.title, 50),
            draft.format.as_str(),
            draft.status.as_str(),
            draft.created_at.format("%Y-%m-%d %H:%M"),
            ticket
        ));
    }

    output
}

/// Detail header followed by the script body
pub fn format_draft_details(draft: &Draft) -> String {
    let mut output = String::new();
    output.push_str(&format!("ID:       {}\n", draft.id));
    output.push_str(&format!("Title:    {}\n", draft.title));
    output.push_str(&format!("Format:   {}\n", draft.format));
    output.push_str(&format!("Status:   {}\n", draft.status));
    output.push_str(&format!("Created:  {}\n", draft.created_at.to_rfc3339()));
    output.push_str(&format!("AI Model: {}\n", draft.ai_model));
    if let Some(by) = &draft.approved_by {
        output.push_str(&format!("Approved: {}\n", by));
    }
    if let Some(reason) = &draft.rejection_reason {
        output.push_str(&format!("Rejected: {}\n", reason));
    }
    if let Some(ticket) = &draft.ticket {
        output.push_str(&format!(
            "Ticket:   {}\n",
            ticket.story_number.as_deref().unwrap_or(&ticket.story_id)
        ));
    }
    output.push_str("\n--- Content ---\n");
    output.push_str(&draft.content);
    if !draft.content.ends_with('\n') {
        output.push('\n');
    }
    output
}

pub fn format_approval_status(status: &ApprovalStatus) -> String {
    let mut output = format!("Test script {}: {}\n", status.draft_id, status.status);
    if let (Some(at), Some(by)) = (status.approved_at, &status.approved_by) {
        output.push_str(&format!("Approved by {} at {}\n", by, at.to_rfc3339()));
    }
    if let Some(reason) = &status.rejection_reason {
        output.push_str(&format!("Rejection reason: {}\n", reason));
    }
    output.push_str(&format!("Approval requests: {}\n", status.approval_requests.len()));
    for request in &status.approval_requests {
        let response = request.response.map(|r| r.as_str()).unwrap_or("open");
        output.push_str(&format!(
            "  #{} requested {} by {}, email {}, {}\n",
            request.id,
            request.requested_at.format("%Y-%m-%d %H:%M"),
            request.requested_by,
            if request.email_sent { "sent" } else { "not sent" },
            response
        ));
    }
    output
}

/// Truncate on a char boundary
pub fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};

    use crate::models::{DraftStatus, ScriptFormat, TicketRef};

    fn draft() -> Draft {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 9, 30, 0).unwrap();
        Draft {
            id: 12,
            transcript_id: 3,
            title: "Checkout flow".into(),
            description: "Generated from voice transcript".into(),
            format: ScriptFormat::Gherkin,
            content: "Feature: Checkout".into(),
            ai_provider: "anthropic".into(),
            ai_model: "claude".into(),
            status: DraftStatus::Approved,
            approved_by: Some("po@example.com".into()),
            approved_at: Some(at),
            rejection_reason: None,
            ticket: Some(TicketRef {
                story_id: "abc".into(),
                story_number: Some("STRY0010001".into()),
                created_at: at,
            }),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ab", 10), "ab");
    }

    #[test]
    fn test_draft_table_row() {
        let table = format_draft_table(&[draft()]);
        let row = table.lines().nth(2).unwrap();
        assert!(row.starts_with("12 "));
        assert!(row.contains("2026-03-04 09:30"));
        assert!(row.ends_with("STRY0010001"));
    }

    #[test]
    fn test_draft_details_ends_with_content() {
        let details = format_draft_details(&draft());
        assert!(details.contains("Ticket:   STRY0010001\n"));
        assert!(details.ends_with("--- Content ---\nFeature: Checkout\n"));
    }

    #[test]
    fn test_write_script_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/script.feature");
        write_script(&path, "Feature: x").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "Feature: x");
    }
}

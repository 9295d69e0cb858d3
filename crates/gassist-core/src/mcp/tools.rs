//! MCP tool definitions and dispatch

use serde_json::{json, Value};
use tracing::debug;

use super::protocol::{ToolDefinition, ToolResult};
use crate::error::Result;
use crate::tools::{self, ToolContext};

fn tool(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Get all tool definitions
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        // Calendar tools
        tool(
            "list_events",
            "List upcoming events from Google Calendar within the next N days.",
            json!({
                "type": "object",
                "properties": {
                    "max_results": {"type": "integer", "description": "Maximum events to return (default: 10)"},
                    "days_ahead": {"type": "integer", "description": "How many days ahead to look (default: 7)"},
                    "calendar_id": {"type": "string", "description": "Calendar ID (default: 'primary')"}
                }
            }),
        ),
        tool(
            "search_events",
            "Search calendar events by free text (title, description, location, attendees).",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Text to search for"},
                    "max_results": {"type": "integer", "description": "Maximum events to return (default: 10)"},
                    "calendar_id": {"type": "string", "description": "Calendar ID (default: 'primary')"}
                },
                "required": ["query"]
            }),
        ),
        tool(
            "create_event",
            "Create a calendar event. Attendees receive invitations.",
            json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string", "description": "Event title"},
                    "start_datetime": {"type": "string", "description": "Start in ISO 8601, e.g. '2026-10-20T10:00:00'"},
                    "end_datetime": {"type": "string", "description": "End in ISO 8601"},
                    "description": {"type": "string", "description": "Event description"},
                    "location": {"type": "string", "description": "Event location"},
                    "attendees": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Attendee email addresses"
                    },
                    "timezone": {"type": "string", "description": "IANA timezone (default: 'UTC')"},
                    "calendar_id": {"type": "string", "description": "Calendar ID (default: 'primary')"}
                },
                "required": ["summary", "start_datetime", "end_datetime"]
            }),
        ),
        tool(
            "update_event",
            "Update fields of an existing calendar event. Omitted fields keep their values.",
            json!({
                "type": "object",
                "properties": {
                    "event_id": {"type": "string", "description": "Event ID"},
                    "summary": {"type": "string"},
                    "start_datetime": {"type": "string", "description": "New start in ISO 8601"},
                    "end_datetime": {"type": "string", "description": "New end in ISO 8601"},
                    "description": {"type": "string"},
                    "location": {"type": "string"},
                    "attendees": {"type": "array", "items": {"type": "string"}},
                    "timezone": {"type": "string"},
                    "calendar_id": {"type": "string", "description": "Calendar ID (default: 'primary')"}
                },
                "required": ["event_id"]
            }),
        ),
        tool(
            "delete_event",
            "Delete a calendar event and notify its attendees.",
            json!({
                "type": "object",
                "properties": {
                    "event_id": {"type": "string", "description": "Event ID"},
                    "calendar_id": {"type": "string", "description": "Calendar ID (default: 'primary')"}
                },
                "required": ["event_id"]
            }),
        ),
        // Gmail tools
        tool(
            "get_latest_emails",
            "Fetch the most recent emails from the inbox with sender, recipient, subject and body.",
            json!({
                "type": "object",
                "properties": {
                    "n": {"type": "integer", "description": "Number of emails (default: 1)"}
                }
            }),
        ),
        tool(
            "search_emails",
            "Search emails with Gmail search syntax, e.g. 'from:ana@example.com subject:invoice'. Returns the top 5 matches.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Gmail search query"}
                },
                "required": ["query"]
            }),
        ),
        tool(
            "get_email_details",
            "Get full details of one email: headers, labels, body and attachment metadata.",
            json!({
                "type": "object",
                "properties": {
                    "email_id": {"type": "string", "description": "Gmail message ID"}
                },
                "required": ["email_id"]
            }),
        ),
        tool(
            "send_email",
            "Send a plain-text email from the authorized account.",
            json!({
                "type": "object",
                "properties": {
                    "to": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Recipient addresses"
                    },
                    "subject": {"type": "string"},
                    "body": {"type": "string", "description": "Plain-text body"},
                    "cc": {"type": "array", "items": {"type": "string"}},
                    "bcc": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["to", "subject", "body"]
            }),
        ),
        tool(
            "download_email_attachments",
            "Download every attachment of an email and return local HTTP links to the saved files.",
            json!({
                "type": "object",
                "properties": {
                    "email_id": {"type": "string", "description": "Gmail message ID"}
                },
                "required": ["email_id"]
            }),
        ),
        // Tasks tools
        tool(
            "list_tasklists",
            "List all Google Tasks lists.",
            json!({"type": "object", "properties": {}}),
        ),
        tool(
            "list_tasks",
            "List tasks in a task list with status, due dates and notes.",
            json!({
                "type": "object",
                "properties": {
                    "tasklist_id": {"type": "string", "description": "Task list ID (default: '@default')"},
                    "max_results": {"type": "integer", "description": "Maximum tasks (default: 100)"},
                    "show_completed": {"type": "boolean", "description": "Include completed and hidden tasks (default: false)"}
                }
            }),
        ),
        tool(
            "create_task",
            "Create a task, optionally as a subtask of another.",
            json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "notes": {"type": "string"},
                    "due": {"type": "string", "description": "Due date in RFC 3339, e.g. '2026-12-25T00:00:00Z'"},
                    "tasklist_id": {"type": "string", "description": "Task list ID (default: '@default')"},
                    "parent": {"type": "string", "description": "Parent task ID"}
                },
                "required": ["title"]
            }),
        ),
        tool(
            "update_task",
            "Update a task's title, notes, due date or status. Omitted fields keep their values.",
            json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string"},
                    "title": {"type": "string"},
                    "notes": {"type": "string"},
                    "due": {"type": "string", "description": "RFC 3339 due date"},
                    "status": {"type": "string", "enum": ["needsAction", "completed"]},
                    "tasklist_id": {"type": "string", "description": "Task list ID (default: '@default')"}
                },
                "required": ["task_id"]
            }),
        ),
        tool(
            "complete_task",
            "Mark a task as completed.",
            json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string"},
                    "tasklist_id": {"type": "string", "description": "Task list ID (default: '@default')"}
                },
                "required": ["task_id"]
            }),
        ),
        tool(
            "delete_task",
            "Delete a task.",
            json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string"},
                    "tasklist_id": {"type": "string", "description": "Task list ID (default: '@default')"}
                },
                "required": ["task_id"]
            }),
        ),
    ]
}

/// Tool handler
#[derive(Clone)]
pub struct ToolHandler {
    ctx: ToolContext,
}

impl ToolHandler {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    /// Execute a tool and wrap its JSON result as MCP text content
    pub async fn execute(&self, name: &str, arguments: &Value) -> Result<Value> {
        debug!("Executing tool: {} with args: {:?}", name, arguments);

        let result = tools::invoke(&self.ctx, name, arguments).await?;
        let is_error = tools::is_error(&result);

        Ok(serde_json::to_value(ToolResult::json(&result, is_error))?)
    }
}

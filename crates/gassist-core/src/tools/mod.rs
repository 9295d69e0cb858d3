//! Calendar, Gmail and Tasks operations exposed to the assistant
//!
//! Every tool returns a JSON object tagged `"status": "success"` or
//! `"status": "error"`. Failures inside a tool never escape as `Err`; they
//! are turned into a structured error result that echoes the entity id the
//! caller asked about.

pub mod calendar;
pub mod gmail;
pub mod tasks;

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::api::RemoteApi;
use crate::error::{Error, ErrorKind, Result};
use crate::fetcher::AttachmentFetcher;

/// Everything a tool needs to reach Google and the local delivery server
#[derive(Clone)]
pub struct ToolContext {
    pub api: Arc<dyn RemoteApi>,
    pub fetcher: Arc<AttachmentFetcher>,
}

impl ToolContext {
    pub fn new(api: Arc<dyn RemoteApi>, fetcher: Arc<AttachmentFetcher>) -> Self {
        Self { api, fetcher }
    }
}

/// Names of all tools, in listing order
pub const TOOL_NAMES: &[&str] = &[
    "list_events",
    "search_events",
    "create_event",
    "update_event",
    "delete_event",
    "get_latest_emails",
    "search_emails",
    "get_email_details",
    "send_email",
    "download_email_attachments",
    "list_tasklists",
    "list_tasks",
    "create_task",
    "update_task",
    "complete_task",
    "delete_task",
];

/// Run a tool by name.
///
/// Only an unknown tool name is an `Err`; everything else yields a tagged result.
pub async fn invoke(ctx: &ToolContext, name: &str, args: &Value) -> Result<Value> {
    debug!("Invoking tool {} with {}", name, args);
    let api = ctx.api.as_ref();

    let outcome = match name {
        "list_events" => calendar::list_events(api, args).await,
        "search_events" => calendar::search_events(api, args).await,
        "create_event" => calendar::create_event(api, args).await,
        "update_event" => calendar::update_event(api, args).await,
        "delete_event" => calendar::delete_event(api, args).await,
        "get_latest_emails" => gmail::get_latest_emails(api, args).await,
        "search_emails" => gmail::search_emails(api, args).await,
        "get_email_details" => gmail::get_email_details(api, args).await,
        "send_email" => gmail::send_email(api, args).await,
        "download_email_attachments" => {
            gmail::download_email_attachments(&ctx.fetcher, args).await
        }
        "list_tasklists" => tasks::list_tasklists(api, args).await,
        "list_tasks" => tasks::list_tasks(api, args).await,
        "create_task" => tasks::create_task(api, args).await,
        "update_task" => tasks::update_task(api, args).await,
        "complete_task" => tasks::complete_task(api, args).await,
        "delete_task" => tasks::delete_task(api, args).await,
        _ => return Err(Error::ToolNotFound(name.to_string())),
    };

    Ok(match outcome {
        Ok(value) => value,
        Err(e) => {
            warn!("Tool {} failed: {}", name, e);
            error_result(&e, failure_headline(name), subject(name, args))
        }
    })
}

/// Whether a tool result is tagged as an error
pub fn is_error(result: &Value) -> bool {
    result["status"] == "error"
}

/// Success result: `{"status": "success", "message": ..., ...fields}`
pub(crate) fn success(message: impl Into<String>, fields: Value) -> Value {
    let mut result = Map::new();
    result.insert("status".to_string(), json!("success"));
    result.insert("message".to_string(), json!(message.into()));
    if let Value::Object(fields) = fields {
        result.extend(fields);
    }
    Value::Object(result)
}

/// Structured error result
pub fn error_result(err: &Error, fallback: &str, subject: Option<(&'static str, String)>) -> Value {
    let message = match err.kind() {
        ErrorKind::RemoteApi | ErrorKind::Io | ErrorKind::Internal | ErrorKind::PartialFailure => {
            fallback.to_string()
        }
        _ => err.headline(),
    };

    let mut result = json!({
        "status": "error",
        "message": message,
        "details": err.details(),
        "code": err.code(),
    });
    if let Some(action) = err.action_hint() {
        result["action"] = json!(action);
    }
    if let Some((key, id)) = subject {
        result[key] = json!(id);
    }
    result
}

fn failure_headline(tool: &str) -> &'static str {
    match tool {
        "list_events" | "search_events" => "Failed to fetch events",
        "create_event" => "Failed to create event",
        "update_event" => "Failed to update event",
        "delete_event" => "Failed to delete event",
        "get_latest_emails" | "search_emails" | "get_email_details" => "Failed to fetch email",
        "send_email" => "Failed to send email",
        "download_email_attachments" => "Failed to download attachments",
        "list_tasklists" => "Failed to fetch task lists",
        "list_tasks" => "Failed to fetch tasks",
        "create_task" => "Failed to create task",
        "update_task" => "Failed to update task",
        "complete_task" => "Failed to complete task",
        "delete_task" => "Failed to delete task",
        _ => "An unexpected error occurred",
    }
}

/// The id an error result should echo back
fn subject(tool: &str, args: &Value) -> Option<(&'static str, String)> {
    let key = match tool {
        "update_event" | "delete_event" => "event_id",
        "get_email_details" | "download_email_attachments" => "email_id",
        "update_task" | "complete_task" | "delete_task" => "task_id",
        "list_tasks" | "create_task" => "tasklist_id",
        _ => return None,
    };
    args[key].as_str().map(|id| (key, id.to_string()))
}

// Argument helpers

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::InvalidRequest(format!("Missing {}", key)))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args[key].as_str()
}

pub(crate) fn u64_or(args: &Value, key: &str, default: u64) -> u64 {
    match &args[key] {
        Value::Number(n) => n.as_u64().unwrap_or(default),
        Value::String(s) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

pub(crate) fn bool_or(args: &Value, key: &str, default: bool) -> bool {
    match &args[key] {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        _ => default,
    }
}

/// A list given either as a JSON array or a comma-separated string
pub(crate) fn string_list(args: &Value, key: &str) -> Option<Vec<String>> {
    let items: Vec<String> = match &args[key] {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .collect(),
        Value::String(s) => s.split(',').map(|s| s.trim().to_string()).collect(),
        _ => return None,
    };
    Some(items.into_iter().filter(|s| !s.is_empty()).collect())
}

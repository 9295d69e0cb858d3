//! Google Tasks tools

use serde_json::{json, Value};
use tracing::info;

use crate::api::{segment, ApiRequest, RemoteApi, TASKS_API};
use crate::error::{EntityKind, Result};
use crate::models::ScopeSet;

use super::{bool_or, optional_str, required_str, success, u64_or};

const DEFAULT_LIST: &str = "@default";

fn tasklist_id(args: &Value) -> &str {
    optional_str(args, "tasklist_id")
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_LIST)
}

fn tasks_url(tasklist: &str) -> String {
    format!("{}/lists/{}/tasks", TASKS_API, segment(tasklist))
}

fn task_url(tasklist: &str, task: &str) -> String {
    format!("{}/{}", tasks_url(tasklist), segment(task))
}

fn format_task(task: &Value) -> Value {
    let mut formatted = json!({
        "id": task["id"],
        "title": task["title"].as_str().unwrap_or("(No Title)"),
        "status": task["status"].as_str().unwrap_or("needsAction"),
        "updated": task["updated"].as_str().unwrap_or(""),
        "position": task["position"].as_str().unwrap_or(""),
    });
    for key in ["notes", "due", "completed", "parent", "links"] {
        if let Some(value) = task.get(key) {
            formatted[key] = value.clone();
        }
    }
    formatted
}

pub async fn list_tasklists(api: &dyn RemoteApi, _args: &Value) -> Result<Value> {
    let response = api
        .call(
            &ScopeSet::tasks(),
            ApiRequest::get(format!("{}/users/@me/lists", TASKS_API)),
        )
        .await?;

    let tasklists: Vec<Value> = response["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|list| {
                    json!({
                        "id": list["id"],
                        "title": list["title"].as_str().unwrap_or("(No Title)"),
                        "updated": list["updated"].as_str().unwrap_or(""),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let message = if tasklists.is_empty() {
        "No task lists found.".to_string()
    } else {
        format!("Found {} task lists", tasklists.len())
    };
    Ok(success(
        message,
        json!({"count": tasklists.len(), "tasklists": tasklists}),
    ))
}

/// Tasks in one list; completed and hidden tasks only when asked for
pub async fn list_tasks(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let tasklist = tasklist_id(args);
    let mut request = ApiRequest::get(tasks_url(tasklist)).query("maxResults", u64_or(args, "max_results", 100));
    if bool_or(args, "show_completed", false) {
        request = request.query("showCompleted", true).query("showHidden", true);
    }

    let response = api
        .call(&ScopeSet::tasks(), request)
        .await
        .map_err(|e| e.for_entity(EntityKind::TaskList, tasklist))?;

    let tasks: Vec<Value> = response["items"]
        .as_array()
        .map(|items| items.iter().map(format_task).collect())
        .unwrap_or_default();

    let message = if tasks.is_empty() {
        "No tasks found in this list.".to_string()
    } else {
        format!("Found {} tasks", tasks.len())
    };
    Ok(success(
        message,
        json!({"count": tasks.len(), "tasklist_id": tasklist, "tasks": tasks}),
    ))
}

pub async fn create_task(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let title = required_str(args, "title")?;
    let tasklist = tasklist_id(args);

    let mut body = json!({"title": title});
    if let Some(notes) = optional_str(args, "notes").filter(|s| !s.is_empty()) {
        body["notes"] = json!(notes);
    }
    if let Some(due) = optional_str(args, "due").filter(|s| !s.is_empty()) {
        body["due"] = json!(due);
    }

    let mut request = ApiRequest::post(tasks_url(tasklist), body);
    if let Some(parent) = optional_str(args, "parent").filter(|s| !s.is_empty()) {
        request = request.query("parent", parent);
    }

    let created = api
        .call(&ScopeSet::tasks(), request)
        .await
        .map_err(|e| e.for_entity(EntityKind::TaskList, tasklist))?;

    info!("Created task {} in {}", created["id"], tasklist);
    Ok(success(
        "Task created successfully",
        json!({
            "task_id": created["id"],
            "title": created["title"],
            "notes": created["notes"].as_str().unwrap_or("No notes"),
            "due": created["due"].as_str().unwrap_or("No due date"),
            "tasklist_id": tasklist,
            "position": created["position"].as_str().unwrap_or(""),
        }),
    ))
}

/// Replace the writable fields of a task, keeping whatever is not given
async fn rewrite_task(
    api: &dyn RemoteApi,
    tasklist: &str,
    task_id: &str,
    title: Option<&str>,
    notes: Option<&str>,
    due: Option<&str>,
    status: Option<&str>,
) -> Result<Value> {
    let url = task_url(tasklist, task_id);
    let current = api
        .call(&ScopeSet::tasks(), ApiRequest::get(url.clone()))
        .await
        .map_err(|e| e.for_entity(EntityKind::Task, task_id))?;

    let mut body = json!({
        "id": current["id"].as_str().unwrap_or(task_id),
        "title": title.or_else(|| current["title"].as_str()).unwrap_or(""),
        "status": status.or_else(|| current["status"].as_str()).unwrap_or("needsAction"),
    });
    if let Some(notes) = notes.or_else(|| current["notes"].as_str()) {
        body["notes"] = json!(notes);
    }
    if let Some(due) = due.or_else(|| current["due"].as_str()) {
        body["due"] = json!(due);
    }

    api.call(&ScopeSet::tasks(), ApiRequest::put(url, body))
        .await
        .map_err(|e| e.for_entity(EntityKind::Task, task_id))
}

pub async fn update_task(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let task_id = required_str(args, "task_id")?;
    let updated = rewrite_task(
        api,
        tasklist_id(args),
        task_id,
        optional_str(args, "title"),
        optional_str(args, "notes"),
        optional_str(args, "due"),
        optional_str(args, "status"),
    )
    .await?;

    info!("Updated task {}", task_id);
    Ok(success(
        "Task updated successfully",
        json!({
            "task_id": updated["id"],
            "title": updated["title"],
            "notes": updated["notes"].as_str().unwrap_or("No notes"),
            "due": updated["due"].as_str().unwrap_or("No due date"),
            "task_status": updated["status"].as_str().unwrap_or("needsAction"),
        }),
    ))
}

pub async fn complete_task(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let task_id = required_str(args, "task_id")?;
    let updated = rewrite_task(api, tasklist_id(args), task_id, None, None, None, Some("completed")).await?;

    info!("Completed task {}", task_id);
    Ok(success(
        "Task marked as completed",
        json!({
            "task_id": updated["id"],
            "title": updated["title"],
            "completed": updated["completed"].as_str().unwrap_or(""),
            "task_status": updated["status"].as_str().unwrap_or("completed"),
        }),
    ))
}

pub async fn delete_task(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let task_id = required_str(args, "task_id")?;
    api.call(
        &ScopeSet::tasks(),
        ApiRequest::delete(task_url(tasklist_id(args), task_id)),
    )
    .await
    .map_err(|e| e.for_entity(EntityKind::Task, task_id))?;

    info!("Deleted task {}", task_id);
    Ok(success("Task deleted successfully", json!({"task_id": task_id})))
}

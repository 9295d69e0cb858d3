//! Google Calendar tools

use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::api::{segment, ApiRequest, RemoteApi, CALENDAR_API};
use crate::error::{EntityKind, Result};
use crate::models::ScopeSet;

use super::{optional_str, required_str, string_list, success, u64_or};

fn events_url(calendar_id: &str) -> String {
    format!("{}/calendars/{}/events", CALENDAR_API, segment(calendar_id))
}

fn event_url(calendar_id: &str, event_id: &str) -> String {
    format!("{}/{}", events_url(calendar_id), segment(event_id))
}

fn calendar_id(args: &Value) -> &str {
    optional_str(args, "calendar_id").unwrap_or("primary")
}

/// `dateTime` for timed events, `date` for all-day events
fn event_time(time: &Value) -> Value {
    time["dateTime"]
        .as_str()
        .or_else(|| time["date"].as_str())
        .map(|s| json!(s))
        .unwrap_or(Value::Null)
}

/// Compact event view for listings
fn format_event(event: &Value, with_attendees: bool) -> Value {
    let mut formatted = json!({
        "id": event["id"],
        "summary": event["summary"].as_str().unwrap_or("(No Title)"),
        "start": event_time(&event["start"]),
        "end": event_time(&event["end"]),
        "status": event["status"].as_str().unwrap_or("confirmed"),
        "html_link": event["htmlLink"].as_str().unwrap_or(""),
    });

    if let Some(location) = event["location"].as_str() {
        formatted["location"] = json!(location);
    }
    if let Some(description) = event["description"].as_str() {
        formatted["description"] = json!(description);
    }
    if with_attendees {
        if let Some(attendees) = event["attendees"].as_array() {
            formatted["attendees"] = attendees
                .iter()
                .map(|a| {
                    json!({
                        "email": a["email"],
                        "responseStatus": a["responseStatus"].as_str().unwrap_or("needsAction"),
                    })
                })
                .collect();
        }
    }
    formatted
}

/// Fields returned after create/update
fn event_summary(event: &Value) -> Value {
    json!({
        "event_id": event["id"],
        "summary": event["summary"],
        "start": event_time(&event["start"]),
        "end": event_time(&event["end"]),
        "html_link": event["htmlLink"].as_str().unwrap_or(""),
        "location": event["location"].as_str().unwrap_or("No location specified"),
    })
}

fn rfc3339(time: chrono::DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Upcoming events within `days_ahead` days
pub async fn list_events(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let max_results = u64_or(args, "max_results", 10);
    let days_ahead = u64_or(args, "days_ahead", 7);
    let calendar_id = calendar_id(args);

    let now = Utc::now();
    let time_max = now + Duration::days(days_ahead as i64);

    let request = ApiRequest::get(events_url(calendar_id))
        .query("timeMin", rfc3339(now))
        .query("timeMax", rfc3339(time_max))
        .query("maxResults", max_results)
        .query("singleEvents", true)
        .query("orderBy", "startTime");
    let response = api.call(&ScopeSet::calendar(), request).await?;

    let events: Vec<Value> = response["items"]
        .as_array()
        .map(|items| items.iter().map(|e| format_event(e, true)).collect())
        .unwrap_or_default();

    let message = if events.is_empty() {
        format!("No upcoming events found in the next {} days.", days_ahead)
    } else {
        format!("Found {} upcoming events", events.len())
    };
    Ok(success(
        message,
        json!({
            "count": events.len(),
            "events": events,
            "time_range": format!("Next {} days from {}", days_ahead, now.format("%Y-%m-%d")),
        }),
    ))
}

/// Free-text search over events
pub async fn search_events(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let query = required_str(args, "query")?;
    let max_results = u64_or(args, "max_results", 10);

    let request = ApiRequest::get(events_url(calendar_id(args)))
        .query("q", query)
        .query("maxResults", max_results)
        .query("singleEvents", true)
        .query("orderBy", "startTime");
    let response = api.call(&ScopeSet::calendar(), request).await?;

    let events: Vec<Value> = response["items"]
        .as_array()
        .map(|items| items.iter().map(|e| format_event(e, false)).collect())
        .unwrap_or_default();

    let message = if events.is_empty() {
        format!("No events found matching '{}'.", query)
    } else {
        format!("Found {} events matching '{}'", events.len(), query)
    };
    Ok(success(
        message,
        json!({
            "count": events.len(),
            "query": query,
            "events": events,
        }),
    ))
}

pub async fn create_event(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let summary = required_str(args, "summary")?;
    let start = required_str(args, "start_datetime")?;
    let end = required_str(args, "end_datetime")?;
    let timezone = optional_str(args, "timezone").unwrap_or("UTC");
    let attendees = string_list(args, "attendees").unwrap_or_default();

    let mut event = json!({
        "summary": summary,
        "start": {"dateTime": start, "timeZone": timezone},
        "end": {"dateTime": end, "timeZone": timezone},
    });
    if let Some(description) = optional_str(args, "description").filter(|s| !s.is_empty()) {
        event["description"] = json!(description);
    }
    if let Some(location) = optional_str(args, "location").filter(|s| !s.is_empty()) {
        event["location"] = json!(location);
    }
    if !attendees.is_empty() {
        event["attendees"] = attendees.iter().map(|email| json!({"email": email})).collect();
    }

    let send_updates = if attendees.is_empty() { "none" } else { "all" };
    let request = ApiRequest::post(events_url(calendar_id(args)), event).query("sendUpdates", send_updates);
    let created = api.call(&ScopeSet::calendar(), request).await?;

    info!("Created event {}", created["id"]);
    Ok(success("Event created successfully", event_summary(&created)))
}

/// Set a start or end time, turning an all-day boundary into a timed one
fn set_time(slot: &mut Value, datetime: &str, timezone: Option<&str>) {
    if slot.get("dateTime").is_some() {
        slot["dateTime"] = json!(datetime);
        if let Some(tz) = timezone {
            slot["timeZone"] = json!(tz);
        }
    } else {
        *slot = json!({
            "dateTime": datetime,
            "timeZone": timezone.unwrap_or("UTC"),
        });
    }
}

/// Read-modify-write of an existing event
pub async fn update_event(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let event_id = required_str(args, "event_id")?;
    let calendar_id = calendar_id(args);
    let url = event_url(calendar_id, event_id);
    let timezone = optional_str(args, "timezone").filter(|s| !s.is_empty());

    let mut event = api
        .call(&ScopeSet::calendar(), ApiRequest::get(url.clone()))
        .await
        .map_err(|e| e.for_entity(EntityKind::Event, event_id))?;
    if !event.is_object() {
        event = Value::Object(Map::new());
    }

    if let Some(summary) = optional_str(args, "summary") {
        event["summary"] = json!(summary);
    }
    if let Some(start) = optional_str(args, "start_datetime") {
        set_time(&mut event["start"], start, timezone);
    }
    if let Some(end) = optional_str(args, "end_datetime") {
        set_time(&mut event["end"], end, timezone);
    }
    if let Some(description) = optional_str(args, "description") {
        event["description"] = json!(description);
    }
    if let Some(location) = optional_str(args, "location") {
        event["location"] = json!(location);
    }
    if let Some(attendees) = string_list(args, "attendees") {
        event["attendees"] = attendees.iter().map(|email| json!({"email": email})).collect();
    }

    let send_updates = if event.get("attendees").is_some() { "all" } else { "none" };
    let request = ApiRequest::put(url, event).query("sendUpdates", send_updates);
    let updated = api
        .call(&ScopeSet::calendar(), request)
        .await
        .map_err(|e| e.for_entity(EntityKind::Event, event_id))?;

    info!("Updated event {}", event_id);
    Ok(success("Event updated successfully", event_summary(&updated)))
}

pub async fn delete_event(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let event_id = required_str(args, "event_id")?;
    let request = ApiRequest::delete(event_url(calendar_id(args), event_id)).query("sendUpdates", "all");

    api.call(&ScopeSet::calendar(), request)
        .await
        .map_err(|e| e.for_entity(EntityKind::Event, event_id))?;

    info!("Deleted event {}", event_id);
    Ok(success("Event deleted successfully", json!({"event_id": event_id})))
}

//! Gmail tools

use std::sync::Arc;

use mail_builder::MessageBuilder;
use serde_json::{json, Value};
use tracing::info;

use crate::api::{segment, ApiRequest, RemoteApi, GMAIL_API};
use crate::error::{EntityKind, Error, Result};
use crate::fetcher::AttachmentFetcher;
use crate::mime::extract;
use crate::models::{encode_base64url, MessagePart, ScopeSet};

use super::{error_result, required_str, string_list, success, u64_or};

const NO_BODY: &str = "No message body found.";

/// Messages fetched with details by `search_emails`
const SEARCH_DETAIL_LIMIT: usize = 5;

fn message_url(id: &str) -> String {
    format!("{}/messages/{}", GMAIL_API, segment(id))
}

fn payload_of(message: &Value) -> Result<MessagePart> {
    match message.get("payload") {
        Some(payload) => Ok(serde_json::from_value(payload.clone())?),
        None => Ok(MessagePart::default()),
    }
}

fn header_or<'a>(payload: &'a MessagePart, name: &str, default: &'a str) -> &'a str {
    payload.header(name).unwrap_or(default)
}

fn message_ids(listing: &Value) -> Vec<String> {
    listing["messages"]
        .as_array()
        .map(|messages| {
            messages
                .iter()
                .filter_map(|m| m["id"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Most recent `n` inbox messages with headers and readable bodies
pub async fn get_latest_emails(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let n = u64_or(args, "n", 1).max(1);

    let listing = api
        .call(
            &ScopeSet::gmail(),
            ApiRequest::get(format!("{}/messages", GMAIL_API))
                .query("labelIds", "INBOX")
                .query("maxResults", n),
        )
        .await?;
    let ids = message_ids(&listing);
    if ids.is_empty() {
        return Ok(success("No emails found.", json!({"count": 0, "emails": []})));
    }

    let mut emails = Vec::with_capacity(ids.len());
    for id in &ids {
        let message = api
            .call(
                &ScopeSet::gmail(),
                ApiRequest::get(message_url(id)).query("format", "full"),
            )
            .await
            .map_err(|e| e.for_entity(EntityKind::Email, id))?;
        let payload = payload_of(&message)?;
        let body = extract(&payload)
            .readable_text()
            .unwrap_or_else(|| NO_BODY.to_string());

        emails.push(json!({
            "id": id,
            "date": header_or(&payload, "Date", "(Unknown Date)"),
            "from": header_or(&payload, "From", "(Unknown Sender)"),
            "to": header_or(&payload, "To", "(Unknown Recipient)"),
            "subject": header_or(&payload, "Subject", "(No Subject)"),
            "body": body,
        }));
    }

    Ok(success(
        format!("Retrieved {} emails", emails.len()),
        json!({"count": emails.len(), "emails": emails}),
    ))
}

/// Gmail search syntax; only the top few hits are resolved to headers
pub async fn search_emails(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let query = required_str(args, "query")?;

    let listing = api
        .call(
            &ScopeSet::gmail(),
            ApiRequest::get(format!("{}/messages", GMAIL_API)).query("q", query),
        )
        .await?;
    let ids = message_ids(&listing);
    if ids.is_empty() {
        return Ok(success(
            "No emails found matching your query.",
            json!({"count": 0, "query": query, "emails": []}),
        ));
    }

    let mut emails = Vec::new();
    for id in ids.iter().take(SEARCH_DETAIL_LIMIT) {
        let message = api
            .call(
                &ScopeSet::gmail(),
                ApiRequest::get(message_url(id))
                    .query("format", "metadata")
                    .query("metadataHeaders", "From")
                    .query("metadataHeaders", "Subject"),
            )
            .await?;
        let payload = payload_of(&message)?;
        emails.push(json!({
            "id": id,
            "from": header_or(&payload, "From", "(Unknown Sender)"),
            "subject": header_or(&payload, "Subject", "(No Subject)"),
        }));
    }

    Ok(success(
        format!("Found {} emails matching '{}'", ids.len(), query),
        json!({"count": emails.len(), "query": query, "emails": emails}),
    ))
}

/// Full view of one message including attachment metadata
pub async fn get_email_details(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let email_id = required_str(args, "email_id")?;

    let message = api
        .call(
            &ScopeSet::gmail(),
            ApiRequest::get(message_url(email_id)).query("format", "full"),
        )
        .await
        .map_err(|e| e.for_entity(EntityKind::Email, email_id))?;
    let payload = payload_of(&message)?;
    let content = extract(&payload);

    let attachments: Vec<Value> = content
        .attachments
        .iter()
        .map(|a| {
            json!({
                "filename": a.filename,
                "mime_type": a.mime_type,
                "size": a.size,
                "attachment_id": a.attachment_id,
            })
        })
        .collect();

    let mut details = json!({
        "id": email_id,
        "thread_id": message["threadId"],
        "labels": message["labelIds"].as_array().cloned().unwrap_or_default(),
        "snippet": message["snippet"].as_str().unwrap_or(""),
        "date": header_or(&payload, "Date", "(Unknown Date)"),
        "from": header_or(&payload, "From", "(Unknown Sender)"),
        "to": header_or(&payload, "To", "(Unknown Recipient)"),
        "subject": header_or(&payload, "Subject", "(No Subject)"),
        "body": content.readable_text().unwrap_or_else(|| NO_BODY.to_string()),
        "size_estimate": message["sizeEstimate"].as_u64().unwrap_or(0),
        "has_attachments": !attachments.is_empty(),
        "attachment_count": attachments.len(),
        "attachments": attachments,
    });

    for (header, key) in [("Cc", "cc"), ("Bcc", "bcc"), ("Message-ID", "message_id")] {
        if let Some(value) = payload.header(header) {
            details[key] = json!(value);
        }
    }
    if let Some(html) = &content.html_body {
        details["body_html"] = json!(html);
    }

    Ok(success("Email details retrieved", details))
}

/// Compose a plain-text message and send it from the authorized account
pub async fn send_email(api: &dyn RemoteApi, args: &Value) -> Result<Value> {
    let to = string_list(args, "to").unwrap_or_default();
    if to.is_empty() {
        return Err(Error::InvalidRequest(
            "At least one recipient required".to_string(),
        ));
    }
    let subject = required_str(args, "subject")?;
    let body = args["body"]
        .as_str()
        .ok_or_else(|| Error::InvalidRequest("Missing body".to_string()))?;
    let cc = string_list(args, "cc").unwrap_or_default();
    let bcc = string_list(args, "bcc").unwrap_or_default();

    let raw = build_message(&to, &cc, &bcc, subject, body)?;
    let sent = api
        .call(
            &ScopeSet::gmail(),
            ApiRequest::post(
                format!("{}/messages/send", GMAIL_API),
                json!({"raw": encode_base64url(&raw)}),
            ),
        )
        .await?;

    info!("Sent email {} to {}", sent["id"], to.join(", "));
    Ok(success(
        "Email sent successfully",
        json!({
            "message_id": sent["id"],
            "thread_id": sent["threadId"],
            "to": to,
            "subject": subject,
        }),
    ))
}

/// RFC 5322 message; Gmail fills in `From` for the authorized account
fn build_message(to: &[String], cc: &[String], bcc: &[String], subject: &str, body: &str) -> Result<Vec<u8>> {
    fn addresses(list: &[String]) -> Vec<&str> {
        list.iter().map(String::as_str).collect()
    }

    let mut builder = MessageBuilder::new()
        .to(addresses(to))
        .subject(subject)
        .text_body(body);
    if !cc.is_empty() {
        builder = builder.cc(addresses(cc));
    }
    if !bcc.is_empty() {
        builder = builder.bcc(addresses(bcc));
    }
    Ok(builder.write_to_vec()?)
}

/// Save every attachment locally and hand back links from the delivery server.
///
/// Some attachments failing still succeeds, tagged `PARTIAL_FAILURE`; all of
/// them failing is an error result. Both carry the full link and failure lists.
pub async fn download_email_attachments(fetcher: &Arc<AttachmentFetcher>, args: &Value) -> Result<Value> {
    let email_id = required_str(args, "email_id")?;

    let report = fetcher.fetch_all(email_id).await?;
    let handle = fetcher.server_handle().await?;

    let links: Vec<Value> = report
        .downloaded
        .iter()
        .map(|file| {
            json!({
                "filename": file.filename,
                "original_filename": file.original_filename,
                "download_link": file.download_link,
                "file_size": file.size_human(),
                "mime_type": file.mime_type,
            })
        })
        .collect();
    let failed: Vec<Value> = report
        .failures
        .iter()
        .map(|f| json!({"filename": f.filename, "error": f.error}))
        .collect();

    let fields = json!({
        "email_id": email_id,
        "total_attachments": report.total(),
        "successful_downloads": report.downloaded.len(),
        "failed_downloads": report.failures.len(),
        "download_links": links,
        "failed_files": failed,
        "server_info": format!("File server running at {}", handle.base_url()),
    });

    if report.failures.is_empty() {
        let message = if report.total() == 0 {
            "No attachments found in this email".to_string()
        } else {
            format!("Downloaded {} attachments", report.downloaded.len())
        };
        return Ok(success(message, fields));
    }

    let err = Error::PartialFailure {
        failed: report.failures.len(),
        total: report.total(),
    };
    let mut result = if report.downloaded.is_empty() {
        error_result(
            &err,
            "Failed to download attachments",
            Some(("email_id", email_id.to_string())),
        )
    } else {
        success(
            format!(
                "Downloaded {} of {} attachments",
                report.downloaded.len(),
                report.total()
            ),
            json!({"code": err.code(), "details": err.details()}),
        )
    };
    if let (Value::Object(result), Value::Object(fields)) = (&mut result, fields) {
        result.extend(fields);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::tests::{free_port_run, server_at};
    use crate::models::{decode_base64url, encode_base64url};
    use crate::testing::{remote_error, ScriptedApi};

    fn multipart_message() -> Value {
        json!({
            "id": "m1",
            "threadId": "t1",
            "labelIds": ["INBOX", "UNREAD"],
            "snippet": "Quarterly numbers",
            "sizeEstimate": 2048,
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    {"name": "Subject", "value": "Q3"},
                    {"name": "From", "value": "ana@example.com"},
                    {"name": "Cc", "value": "bo@example.com"}
                ],
                "parts": [
                    {
                        "mimeType": "multipart/alternative",
                        "parts": [
                            {"mimeType": "text/plain", "body": {"data": encode_base64url(b"plain body")}},
                            {"mimeType": "text/html", "body": {"data": encode_base64url(b"<p>html <b>body</b></p>")}}
                        ]
                    },
                    {
                        "mimeType": "application/pdf",
                        "filename": "q3.pdf",
                        "body": {"size": 1200, "attachmentId": "att-1"}
                    }
                ]
            }
        })
    }

    #[tokio::test]
    async fn test_email_details() {
        let api = ScriptedApi::new(|_| Ok(multipart_message()));
        let result = get_email_details(api.as_ref(), &json!({"email_id": "m1"}))
            .await
            .unwrap();

        assert_eq!(result["status"], "success");
        assert_eq!(result["thread_id"], "t1");
        assert_eq!(result["subject"], "Q3");
        assert_eq!(result["to"], "(Unknown Recipient)");
        assert_eq!(result["cc"], "bo@example.com");
        assert!(result.get("bcc").is_none());
        assert_eq!(result["body"], "html body");
        assert_eq!(result["body_html"], "<p>html <b>body</b></p>");
        assert_eq!(result["attachment_count"], 1);
        assert_eq!(result["attachments"][0]["attachment_id"], "att-1");
        assert_eq!(result["size_estimate"], 2048);
    }

    #[tokio::test]
    async fn test_details_of_missing_email() {
        let api = ScriptedApi::new(|_| Err(remote_error(404)));
        let err = get_email_details(api.as_ref(), &json!({"email_id": "nope"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_latest_emails_uses_inbox() {
        let api = ScriptedApi::new(|req| {
            if req.url.ends_with("/messages") {
                Ok(json!({"messages": [{"id": "m1"}]}))
            } else {
                Ok(multipart_message())
            }
        });
        let result = get_latest_emails(api.as_ref(), &json!({"n": 1})).await.unwrap();

        assert_eq!(result["count"], 1);
        assert_eq!(result["emails"][0]["from"], "ana@example.com");
        assert_eq!(result["emails"][0]["date"], "(Unknown Date)");
        let listing = &api.requests()[0];
        assert_eq!(listing.query_value("labelIds"), Some("INBOX"));
        assert_eq!(listing.query_value("maxResults"), Some("1"));
    }

    #[tokio::test]
    async fn test_search_resolves_top_five() {
        let api = ScriptedApi::new(|req| {
            if req.url.ends_with("/messages") {
                let ids: Vec<_> = (0..8).map(|i| json!({"id": format!("m{}", i)})).collect();
                Ok(json!({"messages": ids}))
            } else {
                Ok(json!({"payload": {"headers": [{"name": "Subject", "value": "hit"}]}}))
            }
        });
        let result = search_emails(api.as_ref(), &json!({"query": "from:ana"}))
            .await
            .unwrap();

        assert_eq!(result["count"], 5);
        assert_eq!(result["emails"][0]["subject"], "hit");
        assert_eq!(result["emails"][0]["from"], "(Unknown Sender)");
        assert_eq!(api.requests().len(), 6);
    }

    #[tokio::test]
    async fn test_send_email_posts_raw_message() {
        let api = ScriptedApi::new(|_| Ok(json!({"id": "sent-1", "threadId": "th-1"})));
        let result = send_email(
            api.as_ref(),
            &json!({
                "to": "ana@example.com, bo@example.com",
                "subject": "Lunch",
                "body": "Noon?"
            }),
        )
        .await
        .unwrap();

        assert_eq!(result["message_id"], "sent-1");
        let request = &api.requests()[0];
        assert!(request.url.ends_with("/messages/send"));
        let raw = request.body.as_ref().unwrap()["raw"].as_str().unwrap().to_string();
        let mime = String::from_utf8(decode_base64url(&raw).unwrap()).unwrap();
        assert!(mime.contains("Subject: Lunch"));
        assert!(mime.contains("ana@example.com"));
        assert!(mime.contains("Noon?"));
    }

    #[tokio::test]
    async fn test_send_requires_recipient() {
        let api = ScriptedApi::new(|_| Ok(json!({})));
        let err = send_email(api.as_ref(), &json!({"subject": "x", "body": "y"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert!(api.requests().is_empty());
    }

    #[tokio::test]
    async fn test_download_attachments_result() {
        let api = ScriptedApi::new(|req| {
            if req.url.contains("/attachments/") {
                Ok(json!({"data": encode_base64url(b"%PDF")}))
            } else {
                Ok(multipart_message())
            }
        });
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(server_at(free_port_run(4), 4));
        let fetcher = Arc::new(AttachmentFetcher::new(api, server.clone(), dir.path()));

        let result = download_email_attachments(&fetcher, &json!({"email_id": "m1"}))
            .await
            .unwrap();
        assert_eq!(result["total_attachments"], 1);
        assert_eq!(result["successful_downloads"], 1);
        assert_eq!(result["download_links"][0]["filename"], "q3.pdf");
        assert_eq!(result["download_links"][0]["file_size"], "4 bytes");
        assert!(result["server_info"]
            .as_str()
            .unwrap()
            .starts_with("File server running at http://"));
        assert!(result.get("code").is_none());
        server.shutdown().await;
    }

    fn two_attachment_message() -> Value {
        json!({
            "id": "m2",
            "payload": {
                "mimeType": "multipart/mixed",
                "parts": [
                    {"mimeType": "application/pdf", "filename": "a.pdf", "body": {"size": 4, "attachmentId": "att-a"}},
                    {"mimeType": "application/pdf", "filename": "b.pdf", "body": {"size": 4, "attachmentId": "att-b"}}
                ]
            }
        })
    }

    #[tokio::test]
    async fn test_download_with_some_failures_is_flagged() {
        let api = ScriptedApi::new(|req| {
            if req.url.ends_with("/attachments/att-b") {
                Err(remote_error(500))
            } else if req.url.contains("/attachments/") {
                Ok(json!({"data": encode_base64url(b"%PDF")}))
            } else {
                Ok(two_attachment_message())
            }
        });
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(server_at(free_port_run(4), 4));
        let fetcher = Arc::new(AttachmentFetcher::new(api, server.clone(), dir.path()));

        let result = download_email_attachments(&fetcher, &json!({"email_id": "m2"}))
            .await
            .unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["code"], "PARTIAL_FAILURE");
        assert_eq!(result["message"], "Downloaded 1 of 2 attachments");
        assert_eq!(result["download_links"][0]["filename"], "a.pdf");
        assert_eq!(result["failed_files"][0]["filename"], "b.pdf");
        assert_eq!(result["failed_downloads"], 1);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_download_with_every_attachment_failing_is_an_error() {
        let api = ScriptedApi::new(|req| {
            if req.url.contains("/attachments/") {
                Err(remote_error(500))
            } else {
                Ok(two_attachment_message())
            }
        });
        let dir = tempfile::tempdir().unwrap();
        let server = Arc::new(server_at(free_port_run(4), 4));
        let fetcher = Arc::new(AttachmentFetcher::new(api, server.clone(), dir.path()));

        let result = download_email_attachments(&fetcher, &json!({"email_id": "m2"}))
            .await
            .unwrap();
        assert_eq!(result["status"], "error");
        assert_eq!(result["code"], "PARTIAL_FAILURE");
        assert_eq!(result["message"], "Failed to download attachments");
        assert_eq!(result["details"], "2 of 2 items failed");
        assert_eq!(result["email_id"], "m2");
        assert_eq!(result["successful_downloads"], 0);
        assert_eq!(result["download_links"], json!([]));
        let failed: Vec<_> = result["failed_files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["filename"].as_str().unwrap())
            .collect();
        assert_eq!(failed, vec!["a.pdf", "b.pdf"]);
        assert!(crate::tools::is_error(&result));
        server.shutdown().await;
    }
}

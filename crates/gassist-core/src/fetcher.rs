//! Download every attachment of a message into the served directory

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::api::{segment, ApiRequest, RemoteApi, GMAIL_API};
use crate::delivery::{AttachmentDeliveryServer, ServerHandle};
use crate::error::{EntityKind, Error, Result};
use crate::mime::extract;
use crate::models::{
    decode_base64url, AttachmentDescriptor, DownloadedFile, FetchFailure, FetchReport, MessagePart,
    ScopeSet,
};

/// Give up on a name after this many numbered variants
const MAX_COLLISIONS: u32 = 10_000;

pub struct AttachmentFetcher {
    api: Arc<dyn RemoteApi>,
    server: Arc<AttachmentDeliveryServer>,
    download_dir: PathBuf,
}

impl AttachmentFetcher {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        server: Arc<AttachmentDeliveryServer>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            server,
            download_dir: download_dir.into(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Delivery server handle, starting it if needed
    pub async fn server_handle(&self) -> Result<ServerHandle> {
        self.server.ensure_running(&self.download_dir).await
    }

    /// Download all attachments of `message_id`.
    ///
    /// One attachment failing never stops the others. Both lists in the
    /// report keep the order the attachments appear in the message.
    pub async fn fetch_all(&self, message_id: &str) -> Result<FetchReport> {
        let handle = self.server_handle().await?;

        let request = ApiRequest::get(format!("{}/messages/{}", GMAIL_API, segment(message_id)))
            .query("format", "full");
        let message = self
            .api
            .call(&ScopeSet::gmail(), request)
            .await
            .map_err(|e| e.for_entity(EntityKind::Email, message_id))?;

        let payload: MessagePart = match message.get("payload") {
            Some(payload) => serde_json::from_value(payload.clone())?,
            None => MessagePart::default(),
        };
        let attachments = extract(&payload).attachments;

        let mut report = FetchReport {
            email_id: message_id.to_string(),
            ..Default::default()
        };

        for attachment in &attachments {
            match self.fetch_one(message_id, attachment, &handle).await {
                Ok(file) => {
                    debug!("Saved {} as {:?}", attachment.filename, file.path);
                    report.downloaded.push(file);
                }
                Err(e) => {
                    warn!("Failed to download {}: {}", attachment.filename, e);
                    report.failures.push(FetchFailure {
                        filename: attachment.filename.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Message {}: {} of {} attachments downloaded",
            message_id,
            report.downloaded.len(),
            report.total()
        );
        Ok(report)
    }

    async fn fetch_one(
        &self,
        message_id: &str,
        attachment: &AttachmentDescriptor,
        handle: &ServerHandle,
    ) -> Result<DownloadedFile> {
        let request = ApiRequest::get(format!(
            "{}/messages/{}/attachments/{}",
            GMAIL_API,
            segment(message_id),
            segment(&attachment.attachment_id)
        ));
        let body = self.api.call(&ScopeSet::gmail(), request).await?;

        let data = body["data"]
            .as_str()
            .ok_or_else(|| Error::Other("Attachment response has no data".to_string()))?;
        let bytes = decode_base64url(data)
            .ok_or_else(|| Error::Other("Attachment data is not valid base64url".to_string()))?;

        let (path, filename) =
            write_unique(&self.download_dir, &safe_filename(&attachment.filename), &bytes).await?;

        Ok(DownloadedFile {
            download_link: handle.url_for(&filename),
            filename,
            original_filename: attachment.filename.clone(),
            path,
            size: bytes.len() as u64,
            mime_type: attachment.mime_type.clone(),
        })
    }
}

/// Reduce a remote filename to one safe path component
pub fn safe_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned = sanitize_filename::sanitize_with_options(
        last.trim(),
        sanitize_filename::Options {
            windows: true,
            truncate: true,
            replacement: "_",
        },
    );
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.' || c == '_') {
        "attachment".to_string()
    } else {
        cleaned
    }
}

/// Split `name` into stem and extension; the extension keeps its dot.
///
/// Leading dots belong to the stem, so `.profile` has no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if name[..i].chars().any(|c| c != '.') => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}

/// `name` for attempt 0, then `stem_1.ext`, `stem_2.ext`, ...
pub fn numbered_name(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    format!("{}_{}{}", stem, n, ext)
}

/// Create a file that did not exist before, numbering the name on collision
async fn write_unique(dir: &Path, name: &str, bytes: &[u8]) -> Result<(PathBuf, String)> {
    for n in 0..MAX_COLLISIONS {
        let candidate = numbered_name(name, n);
        let path = dir.join(&candidate);

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await
        {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
        return Ok((path, candidate));
    }

    Err(Error::Other(format!(
        "Gave up finding a free name for {} after {} attempts",
        name, MAX_COLLISIONS
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::tests::{free_port_run, server_at};
    use crate::models::encode_base64url;
    use crate::testing::{remote_error, ScriptedApi};
    use serde_json::json;

    fn message_with(attachments: &[(&str, &str)]) -> serde_json::Value {
        let parts: Vec<_> = attachments
            .iter()
            .map(|(filename, id)| {
                json!({
                    "mimeType": "application/pdf",
                    "filename": filename,
                    "body": {"size": 3, "attachmentId": id}
                })
            })
            .collect();
        json!({
            "id": "msg-1",
            "payload": {
                "mimeType": "multipart/mixed",
                "filename": "",
                "parts": parts
            }
        })
    }

    fn fetcher(api: Arc<ScriptedApi>, dir: &Path) -> AttachmentFetcher {
        let server = Arc::new(server_at(free_port_run(4), 4));
        AttachmentFetcher::new(api, server, dir)
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(split_extension(".profile"), (".profile", ""));
        assert_eq!(numbered_name("report.pdf", 2), "report_2.pdf");
        assert_eq!(numbered_name("archive.tar.gz", 1), "archive.tar_1.gz");
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("../../etc/passwd"), "passwd");
        assert_eq!(safe_filename("C:\\Users\\me\\q3.xlsx"), "q3.xlsx");
        assert_eq!(safe_filename("what?.txt"), "what_.txt");
        assert_eq!(safe_filename(".."), "attachment");
        assert_eq!(safe_filename("   "), "attachment");
    }

    #[tokio::test]
    async fn test_collisions_are_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let (first, name1) = write_unique(dir.path(), "report.pdf", b"one").await.unwrap();
        let (_, name2) = write_unique(dir.path(), "report.pdf", b"two").await.unwrap();
        let (_, name3) = write_unique(dir.path(), "report.pdf", b"three").await.unwrap();

        assert_eq!(name1, "report.pdf");
        assert_eq!(name2, "report_1.pdf");
        assert_eq!(name3, "report_2.pdf");
        assert_eq!(std::fs::read(first).unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_rest() {
        let api = ScriptedApi::new(|req| {
            if req.url.ends_with("/messages/msg-1") {
                Ok(message_with(&[("a.pdf", "att-a"), ("b.pdf", "att-b"), ("c.pdf", "att-c")]))
            } else if req.url.ends_with("/attachments/att-b") {
                Err(remote_error(500))
            } else {
                Ok(json!({"size": 3, "data": encode_base64url(b"pdf")}))
            }
        });
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(api.clone(), dir.path());

        let report = fetcher.fetch_all("msg-1").await.unwrap();
        let names: Vec<_> = report.downloaded.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "c.pdf"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].filename, "b.pdf");
        assert!(report.is_partial());

        let first = &report.downloaded[0];
        assert_eq!(std::fs::read(&first.path).unwrap(), b"pdf");
        assert!(first.download_link.ends_with("/a.pdf"));
        assert_eq!(api.requests()[0].query_value("format"), Some("full"));
        fetcher.server.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_names_in_one_message() {
        let api = ScriptedApi::new(|req| {
            if req.url.ends_with("/messages/msg-1") {
                Ok(message_with(&[("report.pdf", "1"), ("report.pdf", "2")]))
            } else {
                Ok(json!({"data": encode_base64url(b"x")}))
            }
        });
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.pdf"), "older").unwrap();

        let fetcher = fetcher(api, dir.path());
        let report = fetcher.fetch_all("msg-1").await.unwrap();
        fetcher.server.shutdown().await;
        let names: Vec<_> = report.downloaded.iter().map(|f| f.filename.clone()).collect();
        assert_eq!(names, vec!["report_1.pdf", "report_2.pdf"]);
        assert_eq!(report.downloaded[0].original_filename, "report.pdf");
        assert!(report.downloaded[1].download_link.ends_with("/report_2.pdf"));
        assert_eq!(std::fs::read_to_string(dir.path().join("report.pdf")).unwrap(), "older");
    }

    #[tokio::test]
    async fn test_missing_message_is_not_found() {
        let api = ScriptedApi::new(|_| Err(remote_error(404)));
        let dir = tempfile::tempdir().unwrap();

        let fetcher = fetcher(api, dir.path());
        let err = fetcher.fetch_all("gone-id").await.unwrap_err();
        fetcher.server.shutdown().await;
        assert!(matches!(
            err,
            Error::NotFound { kind: EntityKind::Email, ref id } if id == "gone-id"
        ));
    }

    #[tokio::test]
    async fn test_message_without_attachments() {
        let api = ScriptedApi::new(|_| Ok(message_with(&[])));
        let dir = tempfile::tempdir().unwrap();

        let fetcher = fetcher(api, dir.path());
        let report = fetcher.fetch_all("msg-1").await.unwrap();
        assert_eq!(report.total(), 0);
        fetcher.server.shutdown().await;
    }
}

//! Gmail message payload tree

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// A message header (`Subject`, `From`, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Body of a message part: inline data or a reference to an externalized attachment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    /// Opaque id for fetching the body separately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,

    /// Declared size in bytes
    #[serde(default)]
    pub size: u64,

    /// Inline body, base64url encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// One node of the message payload tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_id: Option<String>,

    #[serde(default)]
    pub mime_type: String,

    /// Gmail sends an empty string for parts that are not attachments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,

    #[serde(default)]
    pub body: PartBody,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    /// Case-insensitive header lookup, first match wins
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Filename, if present and non-empty
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref().filter(|f| !f.is_empty())
    }

    /// Externalized attachment id, if present and non-empty
    pub fn attachment_id(&self) -> Option<&str> {
        self.body.attachment_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Decoded inline body bytes, if any
    pub fn inline_data(&self) -> Option<Vec<u8>> {
        self.body.data.as_deref().and_then(decode_base64url)
    }
}

/// Decode Gmail's URL-safe base64, with or without padding
pub fn decode_base64url(data: &str) -> Option<Vec<u8>> {
    let trimmed: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    URL_SAFE
        .decode(&trimmed)
        .or_else(|_| URL_SAFE_NO_PAD.decode(&trimmed))
        .ok()
}

/// Encode bytes the way Gmail expects a raw message
pub fn encode_base64url(data: &[u8]) -> String {
    URL_SAFE.encode(data)
}

/// Attachment metadata found while walking a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub attachment_id: String,
    pub filename: String,
    pub mime_type: String,
    /// Size declared by the remote API
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_gmail_payload() {
        let json = serde_json::json!({
            "partId": "",
            "mimeType": "multipart/mixed",
            "filename": "",
            "headers": [{"name": "subject", "value": "Quarterly numbers"}],
            "body": {"size": 0},
            "parts": [
                {
                    "partId": "0",
                    "mimeType": "text/plain",
                    "filename": "",
                    "body": {"size": 5, "data": "aGVsbG8="}
                },
                {
                    "partId": "1",
                    "mimeType": "application/pdf",
                    "filename": "q3.pdf",
                    "body": {"size": 2048, "attachmentId": "ANGjdJ8"}
                }
            ]
        });

        let part: MessagePart = serde_json::from_value(json).unwrap();
        assert_eq!(part.header("Subject"), Some("Quarterly numbers"));
        assert_eq!(part.filename(), None);
        assert_eq!(part.parts.len(), 2);
        assert_eq!(part.parts[0].inline_data(), Some(b"hello".to_vec()));
        assert_eq!(part.parts[1].filename(), Some("q3.pdf"));
        assert_eq!(part.parts[1].attachment_id(), Some("ANGjdJ8"));
    }

    #[test]
    fn test_decode_without_padding() {
        assert_eq!(decode_base64url("aGVsbG8"), Some(b"hello".to_vec()));
        assert_eq!(decode_base64url("not base64!!"), None);
    }
}

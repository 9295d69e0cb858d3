//! Body and attachment extraction from a Gmail payload tree

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::models::{AttachmentDescriptor, MessagePart};

/// Deepest nesting level that is inspected; deeper subtrees are skipped
pub const MAX_DEPTH: usize = 50;

/// What a message carries once its part tree has been walked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    pub plain_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<AttachmentDescriptor>,
}

impl ExtractedContent {
    /// Text suitable for an LLM: HTML converted to plain text, else the plain body
    pub fn readable_text(&self) -> Option<String> {
        if let Some(html) = self.html_body.as_deref().filter(|h| !h.trim().is_empty()) {
            return Some(html_to_text(html));
        }
        self.plain_body
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(str::to_string)
    }
}

/// Walk the part tree in document order.
///
/// The first `text/plain` and first `text/html` inline bodies win. Any node
/// with a non-empty filename and an attachment id becomes a descriptor.
pub fn extract(root: &MessagePart) -> ExtractedContent {
    let mut content = ExtractedContent::default();
    let mut stack: Vec<(&MessagePart, usize)> = vec![(root, 0)];
    let mut truncated = false;

    while let Some((part, depth)) = stack.pop() {
        if depth > MAX_DEPTH {
            truncated = true;
            continue;
        }

        let mime_type = part.mime_type.to_ascii_lowercase();
        if mime_type == "text/plain" && content.plain_body.is_none() {
            content.plain_body = inline_text(part);
        } else if mime_type == "text/html" && content.html_body.is_none() {
            content.html_body = inline_text(part);
        }

        if let (Some(filename), Some(attachment_id)) = (part.filename(), part.attachment_id()) {
            content.attachments.push(AttachmentDescriptor {
                attachment_id: attachment_id.to_string(),
                filename: filename.to_string(),
                mime_type: if part.mime_type.is_empty() {
                    "unknown".to_string()
                } else {
                    part.mime_type.clone()
                },
                size: part.body.size,
            });
        }

        // Reverse so children pop in document order
        for child in part.parts.iter().rev() {
            stack.push((child, depth + 1));
        }
    }

    if truncated {
        warn!("Message part tree deeper than {} levels, skipped the rest", MAX_DEPTH);
    }
    content
}

/// Decoded inline body; an empty body does not count as an occurrence
fn inline_text(part: &MessagePart) -> Option<String> {
    part.inline_data()
        .filter(|bytes| !bytes.is_empty())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

static SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("valid regex"));
static STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b.*?</style\s*>").expect("valid regex"));
static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static BR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));
static PARAGRAPH_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</p\s*>").expect("valid regex"));
static BLOCK_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</(div|li|tr|h[1-6]|table|blockquote|ul|ol|section|article|header|footer)\s*>")
        .expect("valid regex")
});
static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a[^>]+href="(https?://[^"]+)"[^>]*>([^<]+)</a>"#).expect("valid regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("valid regex"));
static TRAILING_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+\n").expect("valid regex"));
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("valid regex"));

/// Strip HTML markup down to readable text
pub fn html_to_text(html: &str) -> String {
    let mut text = SCRIPT.replace_all(html, "").into_owned();
    text = STYLE.replace_all(&text, "").into_owned();
    text = COMMENT.replace_all(&text, "").into_owned();

    text = BR.replace_all(&text, "\n").into_owned();
    text = PARAGRAPH_END.replace_all(&text, "\n\n").into_owned();
    text = BLOCK_END.replace_all(&text, "\n").into_owned();

    // <a href="url">text</a> -> text (url), unless the text is the url
    text = ANCHOR
        .replace_all(&text, |caps: &regex::Captures| {
            let (url, label) = (&caps[1], caps[2].trim());
            if label == url {
                label.to_string()
            } else {
                format!("{} ({})", label, url)
            }
        })
        .into_owned();

    text = TAG.replace_all(&text, "").into_owned();
    text = decode_entities(&text);

    text = TRAILING_SPACE.replace_all(&text, "\n").into_owned();
    text = BLANK_RUN.replace_all(&text, "\n\n").into_owned();
    text.trim().to_string()
}

fn decode_entities(text: &str) -> String {
    let text = NUMERIC_ENTITY.replace_all(text, |caps: &regex::Captures| {
        let raw = &caps[1];
        let code = match raw.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => raw.parse::<u32>().ok(),
        };
        code.and_then(char::from_u32)
            .map(|c| c.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    });

    // &amp; last so "&amp;lt;" stays "&lt;"
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

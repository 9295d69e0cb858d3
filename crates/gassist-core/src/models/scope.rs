//! OAuth scope sets

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const GOOGLE_SCOPE_PREFIX: &str = "https://www.googleapis.com/auth/";

/// Full Calendar access
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

/// Read, label and send Gmail messages
pub const GMAIL_MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Full Tasks access
pub const TASKS_SCOPE: &str = "https://www.googleapis.com/auth/tasks";

/// A set of permission strings identifying one credential.
///
/// Scopes are kept sorted, so two sets with the same members are the same
/// identity regardless of the order they were listed in. Different sets are
/// never merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Build a scope set from any list of scope strings
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            scopes
                .into_iter()
                .map(Into::into)
                .map(|s: String| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn calendar() -> Self {
        Self::new([CALENDAR_SCOPE])
    }

    pub fn gmail() -> Self {
        Self::new([GMAIL_MODIFY_SCOPE])
    }

    pub fn tasks() -> Self {
        Self::new([TASKS_SCOPE])
    }

    /// Resolve a short name ("calendar", "gmail", "tasks") or a full scope URL
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "calendar" => Some(Self::calendar()),
            "gmail" | "mail" | "email" => Some(Self::gmail()),
            "tasks" => Some(Self::tasks()),
            other if other.starts_with("https://") => Some(Self::new([name.trim()])),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Space-separated form used in the `scope` request parameter
    pub fn joined(&self) -> String {
        self.iter().collect::<Vec<_>>().join(" ")
    }

    /// Filesystem-safe identifier, distinct for every distinct scope set.
    ///
    /// Google scopes (`https://www.googleapis.com/auth/<name>`) contribute
    /// their bare name, so the calendar set is `calendar`. Any other scope is
    /// percent-encoded in full behind a leading `%`, which a bare name never
    /// contains. Entries are joined with `+`, which neither form contains.
    pub fn slug(&self) -> String {
        if self.is_empty() {
            return "%".to_string();
        }

        self.iter()
            .map(|scope| match google_scope_name(scope) {
                Some(name) => name.to_string(),
                None => format!("%{}", urlencoding::encode(scope)),
            })
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Name of the file this scope set's credential is persisted in
    pub fn token_file_name(&self) -> String {
        format!("token_{}.json", self.slug())
    }
}

/// Bare name of a Google scope, if it can stand in for the whole URI
fn google_scope_name(scope: &str) -> Option<&str> {
    let name = scope.strip_prefix(GOOGLE_SCOPE_PREFIX)?;
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'));
    plain.then_some(name)
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slug())
    }
}

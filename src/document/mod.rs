//! Rhema documents: classification, the typed tree and the parser.

pub mod outline;
pub mod parser;
pub mod types;

use std::path::Path;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tower_lsp::lsp_types::Url;

pub use outline::{Outline, OutlineNode, PathSegment};
pub use parser::{parse, ParseError, ParseResult};
pub use types::*;

/// Which Rhema file a path is, judged from its file name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum DocumentKind {
    Scope,
    Todos,
    Decisions,
    Patterns,
    Conventions,
    Knowledge,
    /// `*.rhema.*`: any section may appear.
    Generic,
}

static FILE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<named>rhema|scope|todos|decisions|patterns|conventions|knowledge)\.ya?ml|.+\.rhema\.[^.]+)$")
        .expect("file name pattern is valid")
});

impl DocumentKind {
    pub fn classify(path: &Path) -> Option<DocumentKind> {
        let name = path.file_name()?.to_str()?;
        let captures = FILE_NAME.captures(name)?;
        let kind = match captures.name("named").map(|m| m.as_str()) {
            Some("rhema") | Some("scope") => DocumentKind::Scope,
            Some("todos") => DocumentKind::Todos,
            Some("decisions") => DocumentKind::Decisions,
            Some("patterns") => DocumentKind::Patterns,
            Some("conventions") => DocumentKind::Conventions,
            Some("knowledge") => DocumentKind::Knowledge,
            _ => DocumentKind::Generic,
        };
        Some(kind)
    }

    pub fn classify_uri(uri: &Url) -> Option<DocumentKind> {
        let path = uri.to_file_path().ok()?;
        Self::classify(&path)
    }
}

/// An open document as last reported by the client.
///
/// Replaced wholesale on every change.
#[derive(Debug, Clone)]
pub struct Document {
    pub uri: Url,
    pub version: i32,
    pub text: String,
    pub kind: DocumentKind,
    pub last_modified: DateTime<Utc>,
}

impl Document {
    pub fn new(uri: Url, version: i32, text: String, kind: DocumentKind) -> Self {
        Document {
            uri,
            version,
            text,
            kind,
            last_modified: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn kind(name: &str) -> Option<DocumentKind> {
        DocumentKind::classify(&PathBuf::from("/ws/project").join(name))
    }

    #[test]
    fn test_fixed_names_are_classified() {
        assert_eq!(kind("scope.yaml"), Some(DocumentKind::Scope));
        assert_eq!(kind("rhema.yml"), Some(DocumentKind::Scope));
        assert_eq!(kind("todos.yaml"), Some(DocumentKind::Todos));
        assert_eq!(kind("decisions.yml"), Some(DocumentKind::Decisions));
        assert_eq!(kind("knowledge.yaml"), Some(DocumentKind::Knowledge));
    }

    #[test]
    fn test_rhema_infix_is_generic() {
        assert_eq!(kind("backend.rhema.yaml"), Some(DocumentKind::Generic));
        assert_eq!(kind("notes.rhema.yml"), Some(DocumentKind::Generic));
    }

    #[test]
    fn test_other_files_are_ignored() {
        assert_eq!(kind("config.yaml"), None);
        assert_eq!(kind("scope.json"), None);
        assert_eq!(kind("my-todos.yaml"), None);
        assert_eq!(kind("rhema"), None);
    }
}

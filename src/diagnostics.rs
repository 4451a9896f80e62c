use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Url};

use crate::{
    config::DiagnosticsSettings,
    document::{parse, ParseError, ParseResult},
    validator::{self, ScopeResolver, ValidationOptions, SOURCE},
};

/// Parse followed by validation: the full diagnostic set for one text.
///
/// A parse failure short-circuits validation; its errors become the
/// diagnostics instead.
pub fn analyze(
    text: &str,
    uri: &Url,
    resolver: &dyn ScopeResolver,
    settings: &DiagnosticsSettings,
) -> (ParseResult, Vec<Diagnostic>) {
    let parsed = parse(text, uri);
    let diagnostics = match &parsed {
        ParseResult::Success(document) => validator::validate(
            document,
            resolver,
            ValidationOptions {
                unresolved_dependencies: settings.unresolved_dependencies,
            },
        ),
        ParseResult::Failure(errors) => parse_error_diagnostics(errors),
    };
    (parsed, diagnostics)
}

pub fn parse_error_diagnostics(errors: &[ParseError]) -> Vec<Diagnostic> {
    errors
        .iter()
        .map(|error| Diagnostic {
            range: error.range,
            message: error.message.clone(),
            source: Some(SOURCE.into()),
            severity: Some(DiagnosticSeverity::ERROR),
            ..Default::default()
        })
        .collect()
}

/// What actually gets pushed to the client for a document.
pub fn publishable(diagnostics: &[Diagnostic], settings: &DiagnosticsSettings) -> Vec<Diagnostic> {
    if !settings.enabled {
        return Vec::new();
    }
    diagnostics
        .iter()
        .take(settings.max_per_file)
        .cloned()
        .collect()
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .any(|diag| diag.severity == Some(DiagnosticSeverity::ERROR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::NoWorkspace;

    fn uri() -> Url {
        Url::parse("file:///ws/todos.yaml").unwrap()
    }

    #[test]
    fn test_parse_failure_becomes_error_diagnostic() {
        let (parsed, diags) = analyze(
            "todos:\n  - id: [unclosed\n",
            &uri(),
            &NoWorkspace,
            &DiagnosticsSettings::default(),
        );
        assert!(!parsed.is_success());
        assert_eq!(diags.len(), parsed.errors().len());
        assert!(has_errors(&diags));
        assert_eq!(diags[0].source.as_deref(), Some("rhema"));
    }

    #[test]
    fn test_clean_document() {
        let (parsed, diags) = analyze(
            "todos:\n  - id: a\n    title: A\n",
            &uri(),
            &NoWorkspace,
            &DiagnosticsSettings::default(),
        );
        assert!(parsed.is_success());
        assert!(diags.is_empty());
    }

    #[test]
    fn test_publishable_respects_settings() {
        let text = "todos:\n  - id: a\n    title: A\n    x: 1\n    y: 2\n    z: 3\n";
        let (_, diags) = analyze(text, &uri(), &NoWorkspace, &DiagnosticsSettings::default());
        assert_eq!(diags.len(), 3);

        let capped = DiagnosticsSettings {
            max_per_file: 2,
            ..Default::default()
        };
        assert_eq!(publishable(&diags, &capped).len(), 2);

        let disabled = DiagnosticsSettings {
            enabled: false,
            ..Default::default()
        };
        assert!(publishable(&diags, &disabled).is_empty());
    }
}

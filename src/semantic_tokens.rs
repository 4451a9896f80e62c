//! Semantic highlighting.
//!
//! Tokens are classified from the document outline and encoded relative to
//! the previous token. The last result per document is remembered under a
//! random result id so `full/delta` requests can answer with the changed span
//! only.

use std::collections::HashMap;

use nanoid::nanoid;
use parking_lot::Mutex;
use tower_lsp::lsp_types::{
    Range, SemanticToken, SemanticTokenModifier, SemanticTokenType, SemanticTokens,
    SemanticTokensDelta, SemanticTokensEdit, SemanticTokensFullDeltaResult, SemanticTokensLegend,
    Url,
};

use crate::document::outline::line_chars;
use crate::document::{Layout, OutlineNode, RhemaDocument, Section};

pub const TOKEN_TYPES: &[SemanticTokenType] = &[
    SemanticTokenType::NAMESPACE,
    SemanticTokenType::TYPE,
    SemanticTokenType::CLASS,
    SemanticTokenType::FUNCTION,
    SemanticTokenType::VARIABLE,
    SemanticTokenType::KEYWORD,
    SemanticTokenType::STRING,
    SemanticTokenType::NUMBER,
    SemanticTokenType::COMMENT,
    SemanticTokenType::PROPERTY,
    SemanticTokenType::ENUM_MEMBER,
];

pub const TOKEN_MODIFIERS: &[SemanticTokenModifier] = &[
    SemanticTokenModifier::DECLARATION,
    SemanticTokenModifier::DEFINITION,
    SemanticTokenModifier::READONLY,
    SemanticTokenModifier::DEPRECATED,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum TokenType {
    Namespace = 0,
    Variable = 4,
    Keyword = 5,
    String = 6,
    Number = 7,
    Comment = 8,
    Property = 9,
    EnumMember = 10,
}

const DECLARATION: u32 = 1;
const DEFINITION: u32 = 1 << 1;
const READONLY: u32 = 1 << 2;
const DEPRECATED: u32 = 1 << 3;

const ENUM_KEYS: &[&str] = &[
    "status",
    "priority",
    "usage",
    "enforcement",
    "type",
    "scope_type",
];
const ID_REFERENCE_KEYS: &[&str] = &["depends_on", "superseded_by", "related_patterns"];
const RETIRED_VALUES: &[&str] = &["deprecated", "superseded", "cancelled", "rejected"];

pub fn legend() -> SemanticTokensLegend {
    SemanticTokensLegend {
        token_types: TOKEN_TYPES.to_vec(),
        token_modifiers: TOKEN_MODIFIERS.to_vec(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RawToken {
    line: u32,
    start: u32,
    length: u32,
    token_type: u32,
    modifiers: u32,
}

fn raw(range: Range, token_type: TokenType, modifiers: u32) -> Option<RawToken> {
    (range.start.line == range.end.line && range.end.character > range.start.character).then(|| {
        RawToken {
            line: range.start.line,
            start: range.start.character,
            length: range.end.character - range.start.character,
            token_type: token_type as u32,
            modifiers,
        }
    })
}

fn scalar_type(value: &str) -> TokenType {
    if value.parse::<f64>().is_ok() {
        TokenType::Number
    } else if matches!(value, "true" | "false" | "null" | "~" | "yes" | "no") {
        TokenType::Keyword
    } else {
        TokenType::String
    }
}

/// Classification of the value held by `key`, given its enclosing keys.
fn value_token(key: &str, value: &str, chain: &[&str], flat: bool) -> (TokenType, u32) {
    let in_dependencies = chain.contains(&"dependencies");
    match key {
        "name" if in_dependencies => (TokenType::Namespace, 0),
        "name" if (chain.len() == 2 && chain[0] == "scope") || (flat && chain.len() == 1) => {
            (TokenType::Namespace, DECLARATION | DEFINITION)
        }
        "id" | "name" => (TokenType::Variable, DECLARATION),
        "dependencies" => (TokenType::Namespace, 0),
        "version" => (scalar_type(value), READONLY),
        k if ID_REFERENCE_KEYS.contains(&k) => (TokenType::Variable, 0),
        k if ENUM_KEYS.contains(&k) => {
            let modifiers = if RETIRED_VALUES.contains(&value) {
                DEPRECATED
            } else {
                0
            };
            (TokenType::EnumMember, modifiers)
        }
        _ => (scalar_type(value), 0),
    }
}

fn key_token(node: &OutlineNode, chain: &[&str], flat: bool) -> (TokenType, u32) {
    match chain {
        [key] if !flat && Section::from_key(key).is_some() => (TokenType::Keyword, 0),
        ["context", _] => (TokenType::Variable, DECLARATION),
        _ if node.key.is_some() => (TokenType::Property, 0),
        _ => (TokenType::String, 0),
    }
}

/// Splits a flow sequence like `[a, "b"]` into item ranges on `line`.
fn flow_items(line: &[char], range: Range) -> Vec<(String, Range)> {
    let (start, end) = (range.start.character as usize, range.end.character as usize);
    if end > line.len() || end < start + 2 || line[start] != '[' || line[end - 1] != ']' {
        return Vec::new();
    }
    let mut items = Vec::new();
    let mut item_start = start + 1;
    for i in start + 1..end {
        if line[i] == ',' || i == end - 1 {
            let mut a = item_start;
            let mut b = i;
            while a < b && line[a].is_whitespace() {
                a += 1;
            }
            while b > a && line[b - 1].is_whitespace() {
                b -= 1;
            }
            if b > a {
                let text: String = line[a..b].iter().collect();
                let text = text.trim_matches(['"', '\'']).to_string();
                let mut item_range = range;
                item_range.start.character = a as u32;
                item_range.end.character = b as u32;
                items.push((text, item_range));
            }
            item_start = i + 1;
        }
    }
    items
}

fn classify(document: &RhemaDocument, text: &str) -> Vec<RawToken> {
    let outline = &document.outline;
    let flat = document.layout == Layout::FlatScope;
    let lines: Vec<Vec<char>> = text.split('\n').map(line_chars).collect();
    let mut tokens = Vec::new();

    for range in outline.comments() {
        tokens.extend(raw(*range, TokenType::Comment, 0));
    }

    for (idx, node) in outline.nodes().iter().enumerate() {
        let chain = outline.key_chain(idx);

        if let (Some(_), Some(key_range)) = (&node.key, node.key_range) {
            let (token_type, modifiers) = key_token(node, &chain, flat);
            tokens.extend(raw(key_range, token_type, modifiers));
        }

        let (Some(value), Some(value_range)) = (&node.value, node.value_range) else {
            continue;
        };
        if node.block_scalar {
            continue;
        }
        // Bare list items take their meaning from the list's key.
        let (key, context): (&str, &[&str]) = match &node.key {
            Some(key) => (key.as_str(), &chain[..chain.len().saturating_sub(1)]),
            None => match chain.split_last() {
                Some((last, rest)) => (*last, rest),
                None => ("", &[]),
            },
        };

        let items = lines
            .get(value_range.start.line as usize)
            .map(|line| flow_items(line, value_range))
            .unwrap_or_default();
        if items.is_empty() {
            let (token_type, modifiers) = value_token(key, value, &with_key(context, key), flat);
            tokens.extend(raw(value_range, token_type, modifiers));
        } else {
            for (item, item_range) in items {
                let (token_type, modifiers) = value_token(key, &item, &with_key(context, key), flat);
                tokens.extend(raw(item_range, token_type, modifiers));
            }
        }
    }

    tokens.sort();
    // Drop anything overlapping the previous token on the same line.
    let mut result: Vec<RawToken> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let Some(last) = result.last() {
            if last.line == token.line && token.start < last.start + last.length {
                continue;
            }
        }
        result.push(token);
    }
    result
}

fn with_key<'a>(context: &[&'a str], key: &'a str) -> Vec<&'a str> {
    let mut chain = context.to_vec();
    if !key.is_empty() {
        chain.push(key);
    }
    chain
}

fn encode(tokens: &[RawToken]) -> Vec<SemanticToken> {
    let mut previous_line = 0;
    let mut previous_start = 0;
    tokens
        .iter()
        .map(|token| {
            let delta_line = token.line - previous_line;
            let delta_start = if delta_line == 0 {
                token.start - previous_start
            } else {
                token.start
            };
            previous_line = token.line;
            previous_start = token.start;
            SemanticToken {
                delta_line,
                delta_start,
                length: token.length,
                token_type: token.token_type,
                token_modifiers_bitset: token.modifiers,
            }
        })
        .collect()
}

/// Encoded tokens for a document; empty when it did not parse.
pub fn tokenize(document: Option<&RhemaDocument>, text: &str) -> Vec<SemanticToken> {
    match document {
        Some(document) if !document.outline.is_empty() => encode(&classify(document, text)),
        _ => Vec::new(),
    }
}

/// Smallest single edit turning `previous` into `current`, in protocol units.
fn diff(previous: &[SemanticToken], current: &[SemanticToken]) -> Vec<SemanticTokensEdit> {
    let prefix = previous
        .iter()
        .zip(current)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = previous.len().min(current.len()) - prefix;
    let suffix = previous
        .iter()
        .rev()
        .zip(current.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let deleted = previous.len() - prefix - suffix;
    let inserted = &current[prefix..current.len() - suffix];
    if deleted == 0 && inserted.is_empty() {
        return Vec::new();
    }
    vec![SemanticTokensEdit {
        start: (prefix * 5) as u32,
        delete_count: (deleted * 5) as u32,
        data: Some(inserted.to_vec()),
    }]
}

#[derive(Debug, Default)]
pub struct SemanticTokenizer {
    previous: Mutex<HashMap<Url, (String, Vec<SemanticToken>)>>,
}

impl SemanticTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn remember(&self, uri: &Url, data: Vec<SemanticToken>) -> String {
        let result_id = nanoid!();
        self.previous
            .lock()
            .insert(uri.clone(), (result_id.clone(), data));
        result_id
    }

    /// Full encode, remembered as the base for the next delta request.
    pub fn provide_semantic_tokens(
        &self,
        uri: &Url,
        document: Option<&RhemaDocument>,
        text: &str,
    ) -> SemanticTokens {
        let data = tokenize(document, text);
        let result_id = self.remember(uri, data.clone());
        SemanticTokens {
            result_id: Some(result_id),
            data,
        }
    }

    /// Range encode. The whole document is tokenized; the result carries no
    /// id and leaves the remembered full result alone.
    pub fn provide_semantic_tokens_range(
        &self,
        document: Option<&RhemaDocument>,
        text: &str,
        _range: Range,
    ) -> SemanticTokens {
        SemanticTokens {
            result_id: None,
            data: tokenize(document, text),
        }
    }

    /// Edits against the result named `previous_result_id`.
    ///
    /// An empty id yields one edit inserting the full token set. An id we no
    /// longer know (superseded or cleared) yields a full result, since the
    /// client's copy cannot be patched.
    pub fn provide_semantic_tokens_delta(
        &self,
        uri: &Url,
        document: Option<&RhemaDocument>,
        text: &str,
        previous_result_id: &str,
    ) -> SemanticTokensFullDeltaResult {
        let data = tokenize(document, text);
        let previous = self
            .previous
            .lock()
            .get(uri)
            .filter(|(id, _)| id == previous_result_id)
            .map(|(_, data)| data.clone());

        let edits = match previous {
            Some(previous) => diff(&previous, &data),
            None if previous_result_id.is_empty() => vec![SemanticTokensEdit {
                start: 0,
                delete_count: 0,
                data: Some(data.clone()),
            }],
            None => {
                let result_id = self.remember(uri, data.clone());
                return SemanticTokensFullDeltaResult::Tokens(SemanticTokens {
                    result_id: Some(result_id),
                    data,
                });
            }
        };
        let result_id = self.remember(uri, data);
        SemanticTokensFullDeltaResult::TokensDelta(SemanticTokensDelta {
            result_id: Some(result_id),
            edits,
        })
    }

    pub fn forget(&self, uri: &Url) {
        self.previous.lock().remove(uri);
    }

    pub fn clear(&self) {
        self.previous.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse;

    fn uri() -> Url {
        Url::parse("file:///ws/todos.yaml").unwrap()
    }

    fn edits(result: SemanticTokensFullDeltaResult) -> SemanticTokensDelta {
        match result {
            SemanticTokensFullDeltaResult::TokensDelta(delta) => delta,
            other => panic!("expected edits, got {other:?}"),
        }
    }

    fn tokens(text: &str) -> Vec<SemanticToken> {
        let parsed = parse(text, &uri());
        tokenize(parsed.document(), text)
    }

    #[test]
    fn test_legend_lists_required_names() {
        let legend = legend();
        for name in [
            "namespace", "type", "class", "function", "variable", "keyword", "string", "number",
            "comment",
        ] {
            assert!(legend.token_types.iter().any(|t| t.as_str() == name), "{name}");
        }
        for name in ["declaration", "definition", "readonly", "deprecated"] {
            assert!(legend.token_modifiers.iter().any(|m| m.as_str() == name), "{name}");
        }
    }

    #[test]
    fn test_simple_pair_has_tokens() {
        let data = tokens("name: test");
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].length, 4);
        assert_eq!(data[1].delta_start, 6);
    }

    #[test]
    fn test_empty_and_malformed_give_no_tokens() {
        assert!(tokens("").is_empty());
        assert!(tokens("name: test\n  invalid: indentation").is_empty());
    }

    #[test]
    fn test_classification() {
        let text = "todos:  # work\n  - id: a\n    status: cancelled\n    depends_on: [b, c]\n";
        let data = tokens(text);
        let types: Vec<u32> = data.iter().map(|t| t.token_type).collect();
        // todos, comment, id, a, status, cancelled, depends_on, b, c
        assert_eq!(
            types,
            vec![
                TokenType::Keyword as u32,
                TokenType::Comment as u32,
                TokenType::Property as u32,
                TokenType::Variable as u32,
                TokenType::Property as u32,
                TokenType::EnumMember as u32,
                TokenType::Property as u32,
                TokenType::Variable as u32,
                TokenType::Variable as u32,
            ]
        );
        assert_eq!(data[3].token_modifiers_bitset, DECLARATION);
        assert_eq!(data[5].token_modifiers_bitset, DEPRECATED);
    }

    #[test]
    fn test_delta_with_empty_id_is_full_insert() {
        let tokenizer = SemanticTokenizer::new();
        let text = "name: test";
        let parsed = parse(text, &uri());
        let full = tokenize(parsed.document(), text);
        let delta = edits(tokenizer.provide_semantic_tokens_delta(&uri(), parsed.document(), text, ""));
        assert_eq!(delta.edits.len(), 1);
        assert_eq!(delta.edits[0].start, 0);
        assert_eq!(delta.edits[0].data.as_ref(), Some(&full));
    }

    #[test]
    fn test_delta_reports_only_changed_span() {
        let tokenizer = SemanticTokenizer::new();
        let before = "todos:\n  - id: a\n    title: one\n";
        let after = "todos:\n  - id: a\n    title: one\n    priority: high\n";

        let parsed = parse(before, &uri());
        let first = tokenizer.provide_semantic_tokens(&uri(), parsed.document(), before);
        let id = first.result_id.unwrap();

        let parsed = parse(after, &uri());
        let delta = edits(tokenizer.provide_semantic_tokens_delta(&uri(), parsed.document(), after, &id));
        assert_eq!(delta.edits.len(), 1);
        let edit = &delta.edits[0];
        assert_eq!(edit.start, (first.data.len() * 5) as u32);
        assert_eq!(edit.delete_count, 0);
        assert_eq!(edit.data.as_ref().map(Vec::len), Some(2));
        assert_ne!(delta.result_id, Some(id));
    }

    #[test]
    fn test_unchanged_document_has_no_edits() {
        let tokenizer = SemanticTokenizer::new();
        let text = "todos:\n  - id: a\n";
        let parsed = parse(text, &uri());
        let first = tokenizer.provide_semantic_tokens(&uri(), parsed.document(), text);
        let delta = edits(tokenizer.provide_semantic_tokens_delta(
            &uri(),
            parsed.document(),
            text,
            first.result_id.as_deref().unwrap(),
        ));
        assert!(delta.edits.is_empty());
    }

    /// Applies `edits` to `data` the way a client does.
    fn apply(data: &[SemanticToken], edits: &[SemanticTokensEdit]) -> Vec<SemanticToken> {
        let mut data = data.to_vec();
        for edit in edits.iter().rev() {
            let start = edit.start as usize / 5;
            let end = start + edit.delete_count as usize / 5;
            data.splice(start..end, edit.data.clone().unwrap_or_default());
        }
        data
    }

    #[test]
    fn test_range_request_keeps_full_result_for_delta() {
        let tokenizer = SemanticTokenizer::new();
        let text = "todos:\n  - id: a\n    title: one\n";
        let parsed = parse(text, &uri());
        let full = tokenizer.provide_semantic_tokens(&uri(), parsed.document(), text);

        let range = tokenizer.provide_semantic_tokens_range(parsed.document(), text, Range::default());
        assert_eq!(range.data, full.data);
        assert!(range.result_id.is_none());

        let delta = edits(tokenizer.provide_semantic_tokens_delta(
            &uri(),
            parsed.document(),
            text,
            full.result_id.as_deref().unwrap(),
        ));
        assert_eq!(apply(&full.data, &delta.edits), full.data);
    }

    #[test]
    fn test_forgotten_id_answers_with_full_tokens() {
        let tokenizer = SemanticTokenizer::new();
        let text = "todos:\n  - id: a\n";
        let parsed = parse(text, &uri());
        let full = tokenizer.provide_semantic_tokens(&uri(), parsed.document(), text);
        tokenizer.clear();

        let result = tokenizer.provide_semantic_tokens_delta(
            &uri(),
            parsed.document(),
            text,
            full.result_id.as_deref().unwrap(),
        );
        let SemanticTokensFullDeltaResult::Tokens(tokens) = result else {
            panic!("edits against a forgotten result");
        };
        assert_eq!(tokens.data, full.data);

        // The new id is a valid base again.
        let delta = edits(tokenizer.provide_semantic_tokens_delta(
            &uri(),
            parsed.document(),
            text,
            tokens.result_id.as_deref().unwrap(),
        ));
        assert!(delta.edits.is_empty());
    }

    #[test]
    fn test_diff_replaces_middle() {
        let token = |n: u32| SemanticToken {
            delta_line: n,
            ..Default::default()
        };
        let edits = diff(&[token(1), token(2), token(3)], &[token(1), token(9), token(3)]);
        assert_eq!(edits.len(), 1);
        assert_eq!((edits[0].start, edits[0].delete_count), (5, 5));
        assert_eq!(edits[0].data.as_ref().unwrap(), &vec![token(9)]);
    }

    #[test]
    fn test_byte_order_mark_offsets_first_token() {
        let data = tokens("\u{feff}name: test");
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].delta_start, 1);
        assert_eq!(data[0].length, 4);
        assert_eq!(data[1].delta_start, 6);
    }
}

//! Position to symbol resolution shared by the query providers.
//!
//! All scans are purely textual, case-sensitive and word-bounded, so they work
//! on documents that fail to parse as well.

use ropey::Rope;
use tower_lsp::lsp_types::{Location, Position, Range, Url};

use crate::document::Spanned;

/// Keys whose scalar value declares the name of the enclosing record.
const DECLARING_KEYS: &[&str] = &["id", "name"];

pub fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')
}

/// The key or scalar token under the cursor.
///
/// Returns `None` when the position is outside the text or touches no token.
pub fn word_at(text: &str, position: Position) -> Option<Spanned<String>> {
    let rope = Rope::from_str(text);
    let line_idx = position.line as usize;
    if line_idx >= rope.len_lines() {
        return None;
    }
    let line: Vec<char> = rope
        .line(line_idx)
        .chars()
        .take_while(|c| *c != '\n' && *c != '\r')
        .collect();
    let col = position.character as usize;
    if col > line.len() {
        return None;
    }

    let anchor = if col < line.len() && is_word_char(line[col]) {
        col
    } else if col > 0 && is_word_char(line[col - 1]) {
        col - 1
    } else {
        return None;
    };

    let start = line[..anchor]
        .iter()
        .rposition(|c| !is_word_char(*c))
        .map(|p| p + 1)
        .unwrap_or(0);
    let end = line[anchor..]
        .iter()
        .position(|c| !is_word_char(*c))
        .map(|p| anchor + p)
        .unwrap_or(line.len());

    Some(Spanned::new(
        line[start..end].iter().collect(),
        Range {
            start: Position::new(position.line, start as u32),
            end: Position::new(position.line, end as u32),
        },
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Occurrence {
    range: Range,
    declaration: bool,
}

fn is_declaration(line: &str, start: usize, end: usize) -> bool {
    let after = line[end..].trim_start_matches(['"', '\'']).trim_start();
    if after.starts_with(':') && (after.len() == 1 || after[1..].starts_with([' ', '\t'])) {
        return true;
    }
    let before = line[..start].trim_end_matches(['"', '\'']).trim_end();
    let Some(key) = before.strip_suffix(':') else {
        return false;
    };
    let key = key
        .trim_start_matches('\u{feff}')
        .trim()
        .trim_start_matches("- ")
        .trim()
        .trim_matches(['"', '\'']);
    DECLARING_KEYS.contains(&key)
}

/// Every word-bounded occurrence of `name`, in document order.
fn occurrences(name: &str, text: &str) -> Vec<Occurrence> {
    if name.is_empty() {
        return Vec::new();
    }
    let mut found = Vec::new();
    for (line_no, line) in text.split('\n').enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        for (start, matched) in line.match_indices(name) {
            let end = start + matched.len();
            let bounded_left = line[..start].chars().next_back().map_or(true, |c| !is_word_char(c));
            let bounded_right = line[end..].chars().next().map_or(true, |c| !is_word_char(c));
            if !(bounded_left && bounded_right) {
                continue;
            }
            let start_char = line[..start].chars().count() as u32;
            let end_char = start_char + matched.chars().count() as u32;
            found.push(Occurrence {
                range: Range {
                    start: Position::new(line_no as u32, start_char),
                    end: Position::new(line_no as u32, end_char),
                },
                declaration: is_declaration(line, start, end),
            });
        }
    }
    found
}

fn before_or_at(a: Position, b: Position) -> bool {
    (a.line, a.character) <= (b.line, b.character)
}

/// The declaration of `name` nearest before `position`, falling back to the
/// first one after it.
pub fn find_local_definition(name: &str, text: &str, position: Position) -> Option<Range> {
    let declarations: Vec<Range> = occurrences(name, text)
        .into_iter()
        .filter(|occurrence| occurrence.declaration)
        .map(|occurrence| occurrence.range)
        .collect();

    declarations
        .iter()
        .rev()
        .find(|range| before_or_at(range.start, position))
        .or_else(|| declarations.first())
        .copied()
}

pub fn find_local_references(name: &str, text: &str, uri: &Url) -> Vec<Location> {
    occurrences(name, text)
        .into_iter()
        .map(|occurrence| Location::new(uri.clone(), occurrence.range))
        .collect()
}

pub fn find_references_in_range(name: &str, text: &str, range: Range, uri: &Url) -> Vec<Location> {
    occurrences(name, text)
        .into_iter()
        .filter(|occurrence| {
            before_or_at(range.start, occurrence.range.start)
                && before_or_at(occurrence.range.end, range.end)
        })
        .map(|occurrence| Location::new(uri.clone(), occurrence.range))
        .collect()
}

pub fn get_reference_count(name: &str, text: &str) -> usize {
    occurrences(name, text).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCOPE: &str = "scope:\n  name: test-scope\n  dependencies:\n    - core\ntodos:\n  - id: todo-1\n    title: depends on core\n  - id: todo-2\n    depends_on: [todo-1]\n";

    fn uri() -> Url {
        Url::parse("file:///ws/scope.yaml").unwrap()
    }

    #[test]
    fn test_word_at_value_and_key() {
        let word = word_at(SCOPE, Position::new(1, 10)).unwrap();
        assert_eq!(word.value, "test-scope");
        assert_eq!(word.range.start.character, 8);
        assert_eq!(word.range.end.character, 18);

        let key = word_at(SCOPE, Position::new(2, 3)).unwrap();
        assert_eq!(key.value, "dependencies");
    }

    #[test]
    fn test_word_at_end_of_token() {
        let word = word_at(SCOPE, Position::new(1, 18)).unwrap();
        assert_eq!(word.value, "test-scope");
    }

    #[test]
    fn test_word_at_punctuation_and_bounds() {
        assert!(word_at(SCOPE, Position::new(1, 0)).is_none());
        assert!(word_at(SCOPE, Position::new(200, 0)).is_none());
        assert!(word_at(SCOPE, Position::new(1, 200)).is_none());
        assert!(word_at("", Position::new(0, 0)).is_none());
    }

    #[test]
    fn test_references_include_declaration() {
        let refs = find_local_references("test-scope", SCOPE, &uri());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].range.start, Position::new(1, 8));
    }

    #[test]
    fn test_references_are_word_bounded_and_case_sensitive() {
        let text = "a: todo-1\nb: todo-10\nc: Todo-1\nd: [todo-1, x]\n";
        assert_eq!(get_reference_count("todo-1", text), 2);
        assert_eq!(get_reference_count("", text), 0);
    }

    #[test]
    fn test_count_agrees_with_references() {
        for name in ["core", "todo-1", "todo-2", "scope", "missing", ""] {
            assert_eq!(
                find_local_references(name, SCOPE, &uri()).len(),
                get_reference_count(name, SCOPE),
                "{name}"
            );
        }
    }

    #[test]
    fn test_references_in_range() {
        let range = Range {
            start: Position::new(4, 0),
            end: Position::new(8, 100),
        };
        let refs = find_references_in_range("todo-1", SCOPE, range, &uri());
        assert_eq!(refs.len(), 2);
        let refs = find_references_in_range("core", SCOPE, range, &uri());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].range.start.line, 6);
    }

    #[test]
    fn test_definition_prefers_preceding_declaration() {
        let def = find_local_definition("todo-1", SCOPE, Position::new(8, 20)).unwrap();
        assert_eq!(def.start, Position::new(5, 8));
    }

    #[test]
    fn test_definition_falls_back_to_following_declaration() {
        let text = "todos:\n  - id: b\n    depends_on: [a]\n  - id: a\n";
        let def = find_local_definition("a", text, Position::new(2, 18)).unwrap();
        assert_eq!(def.start, Position::new(3, 8));
    }

    #[test]
    fn test_mapping_keys_are_declarations() {
        let text = "context:\n  architecture:\n    summary: see architecture\n";
        let def = find_local_definition("architecture", text, Position::new(2, 20)).unwrap();
        assert_eq!(def.start, Position::new(1, 2));
    }

    #[test]
    fn test_plain_mentions_are_not_declarations() {
        assert!(find_local_definition("core", "title: depends on core\n", Position::new(0, 0)).is_none());
    }

    #[test]
    fn test_declaration_after_byte_order_mark() {
        let text = "\u{feff}name: test\n";
        let def = find_local_definition("test", text, Position::new(0, 0)).unwrap();
        assert_eq!(def, Range::new(Position::new(0, 7), Position::new(0, 11)));
        let word = word_at(text, Position::new(0, 8)).unwrap();
        assert_eq!(word.range, def);
    }
}

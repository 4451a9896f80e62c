//! Line-oriented outline of block-style YAML.
//!
//! serde_yaml tells us *what* a document contains but not *where*. The
//! outline recovers positions: every mapping key and list item becomes an
//! [`OutlineNode`] with its key range, inline value range and full extent,
//! linked to its parent by indentation.
//!
//! Flow collections (`[a, b]`, `{a: b}`) are kept as opaque scalar values;
//! lookups into them fall back to the enclosing node.

use tower_lsp::lsp_types::{Position, Range};

/// One step of a path into the document tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    pub fn key(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            PathSegment::Key(key) => Some(key),
            PathSegment::Index(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineNode {
    /// Mapping key (unquoted), `None` for bare list items.
    pub key: Option<String>,
    pub key_range: Option<Range>,
    /// True for `- ` list items.
    pub item: bool,
    /// Position among the item siblings of the parent.
    pub item_index: usize,
    /// Inline scalar value with quotes removed.
    pub value: Option<String>,
    pub value_range: Option<Range>,
    pub block_scalar: bool,
    pub indent: u32,
    pub line: u32,
    /// Full extent including children and continuation lines.
    pub range: Range,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl OutlineNode {
    /// A key whose value lives on the following, deeper lines.
    pub fn opens_block(&self) -> bool {
        self.key.is_some() && self.value.is_none() && !self.block_scalar
    }
}

/// Where the cursor sits relative to the outline, for completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorContext {
    /// Path of the node that encloses the cursor.
    pub path: Vec<PathSegment>,
    /// Set when the cursor is in the value position of this key.
    pub value_of: Option<String>,
    /// Set when the cursor is on a bare `- ` list item.
    pub item_scalar: bool,
    /// Word characters immediately before the cursor.
    pub prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outline {
    nodes: Vec<OutlineNode>,
    roots: Vec<usize>,
    comments: Vec<Range>,
}

#[derive(Debug, Default)]
struct LineScan {
    indent: usize,
    item: Option<usize>,
    key: Option<(String, usize, usize)>,
    value: Option<(String, usize, usize)>,
    comment: Option<usize>,
    block_scalar: bool,
    marker: bool,
    end: usize,
}

impl LineScan {
    fn is_structural(&self) -> bool {
        self.item.is_some() || self.key.is_some()
    }
}

/// Characters of one line as the editor counts them, byte order mark included.
pub(crate) fn line_chars(line: &str) -> Vec<char> {
    line.strip_suffix('\r').unwrap_or(line).chars().collect()
}

fn range(line: usize, start: usize, end: usize) -> Range {
    Range {
        start: Position {
            line: line as u32,
            character: start as u32,
        },
        end: Position {
            line: line as u32,
            character: end as u32,
        },
    }
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn unquote(raw: &str) -> String {
    let bytes = raw.as_bytes();
    if raw.len() >= 2
        && ((bytes[0] == b'"' && bytes[raw.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[raw.len() - 1] == b'\''))
    {
        raw[1..raw.len() - 1].to_string()
    } else {
        raw.to_string()
    }
}

/// Finds `key:` at `start`, returning the key text, its span and the colon column.
fn split_key(chars: &[char], start: usize) -> Option<(String, usize, usize)> {
    let len = chars.len();
    let colon_follows = |at: usize| at < len && chars[at] == ':' && (at + 1 == len || is_blank(chars[at + 1]));

    match chars[start] {
        quote @ ('"' | '\'') => {
            let mut i = start + 1;
            while i < len {
                if chars[i] == '\\' && quote == '"' {
                    i += 2;
                    continue;
                }
                if chars[i] == quote {
                    break;
                }
                i += 1;
            }
            if i >= len {
                return None;
            }
            let key_end = i + 1;
            let mut j = key_end;
            while j < len && is_blank(chars[j]) {
                j += 1;
            }
            colon_follows(j).then(|| (chars[start + 1..i].iter().collect(), key_end, j))
        }
        '[' | '{' | '|' | '>' | '#' => None,
        _ => {
            for i in start..len {
                if chars[i] == '#' && i > start && is_blank(chars[i - 1]) {
                    return None;
                }
                if colon_follows(i) {
                    let key: String = chars[start..i].iter().collect();
                    let trimmed = key.trim_end();
                    if trimmed.is_empty() {
                        return None;
                    }
                    return Some((trimmed.to_string(), start + trimmed.chars().count(), i));
                }
            }
            None
        }
    }
}

/// Scans a scalar starting at `start`, stopping at an unquoted ` #` comment.
fn scan_value(chars: &[char], start: usize) -> (Option<(String, usize, usize)>, Option<usize>) {
    let len = chars.len();
    let mut i = start;
    while i < len && is_blank(chars[i]) {
        i += 1;
    }
    let value_start = i;
    let (mut in_double, mut in_single) = (false, false);
    let mut comment = None;
    while i < len {
        match chars[i] {
            '"' if !in_single => in_double = !in_double,
            '\'' if !in_double => in_single = !in_single,
            '#' if !in_double && !in_single && (i == 0 || is_blank(chars[i - 1])) => {
                comment = Some(i);
                break;
            }
            _ => {}
        }
        i += 1;
    }
    let mut end = comment.unwrap_or(len);
    while end > value_start && is_blank(chars[end - 1]) {
        end -= 1;
    }
    if end <= value_start {
        return (None, comment);
    }
    let raw: String = chars[value_start..end].iter().collect();
    (Some((unquote(&raw), value_start, end)), comment)
}

fn scan_line(chars: &[char]) -> Option<LineScan> {
    let len = chars.len();
    let mut col = 0;
    while col < len && is_blank(chars[col]) {
        col += 1;
    }
    if col == len {
        return None;
    }

    let mut scan = LineScan {
        indent: col,
        end: len,
        ..Default::default()
    };
    while scan.end > col && is_blank(chars[scan.end - 1]) {
        scan.end -= 1;
    }

    if chars[col] == '#' {
        scan.comment = Some(col);
        return Some(scan);
    }
    let rest: String = chars[col..].iter().collect();
    let rest = rest.trim_end();
    if col == 0 && (rest == "---" || rest == "..." || rest.starts_with("--- ") || rest.starts_with('%')) {
        scan.marker = true;
        return Some(scan);
    }

    let mut content = col;
    if chars[col] == '-' && (col + 1 == len || is_blank(chars[col + 1])) {
        scan.item = Some(col);
        content = col + 1;
        while content < len && is_blank(chars[content]) {
            content += 1;
        }
        if content == len {
            return Some(scan);
        }
    }

    let value_from = match split_key(chars, content) {
        Some((key, key_end, colon)) => {
            scan.key = Some((key, content, key_end));
            colon + 1
        }
        None => content,
    };
    let (value, comment) = scan_value(chars, value_from);
    scan.comment = comment;
    if let Some((text, ..)) = &value {
        let first = text.chars().next();
        scan.block_scalar = matches!(first, Some('|') | Some('>'))
            && text.chars().skip(1).all(|c| c == '-' || c == '+' || c.is_ascii_digit());
    }
    scan.value = value;
    Some(scan)
}

impl Outline {
    /// Outlines `text`. A leading byte order mark is not indentation, but it
    /// still occupies column 0 of the first line in the editor.
    pub fn parse(text: &str) -> Outline {
        match text.strip_prefix('\u{feff}') {
            Some(rest) => {
                let mut outline = Outline::parse_lines(rest);
                outline.shift_first_line(1);
                outline
            }
            None => Outline::parse_lines(text),
        }
    }

    fn parse_lines(text: &str) -> Outline {
        let mut outline = Outline::default();
        let mut stack: Vec<usize> = Vec::new();
        let mut last: Option<usize> = None;
        // (indent of the owning node, owning node)
        let mut block: Option<(usize, usize)> = None;

        for (line_no, line) in text.split('\n').enumerate() {
            let chars = line_chars(line);

            if let Some((owner_indent, owner)) = block {
                let indent = chars.iter().take_while(|c| is_blank(**c)).count();
                if indent == chars.len() || indent > owner_indent {
                    if indent < chars.len() {
                        outline.extend(owner, line_no, chars.len());
                    }
                    continue;
                }
                block = None;
            }

            let Some(scan) = scan_line(&chars) else {
                continue;
            };
            if let Some(comment) = scan.comment {
                outline.comments.push(range(line_no, comment, chars.len()));
            }
            if scan.marker {
                continue;
            }
            if !scan.is_structural() {
                // Comment-only line or a continuation of a multi-line scalar.
                if scan.comment != Some(scan.indent) {
                    if let Some(last) = last {
                        outline.extend(last, line_no, scan.end);
                    }
                }
                continue;
            }

            let line_end = scan.comment.map(|c| c.min(scan.end)).unwrap_or(scan.end);
            let mut owner = None;

            if let Some(dash) = scan.item {
                let (value, value_range) = match (&scan.key, &scan.value) {
                    (None, Some((text, start, end))) => {
                        (Some(text.clone()), Some(range(line_no, *start, *end)))
                    }
                    _ => (None, None),
                };
                let node = OutlineNode {
                    key: None,
                    key_range: None,
                    item: true,
                    item_index: 0,
                    value,
                    value_range,
                    block_scalar: scan.key.is_none() && scan.block_scalar,
                    indent: dash as u32,
                    line: line_no as u32,
                    range: range(line_no, dash, line_end.max(dash + 1)),
                    parent: None,
                    children: Vec::new(),
                };
                let idx = outline.attach(&mut stack, node);
                owner = Some((dash, idx));
                last = Some(idx);
            }

            if let Some((key, key_start, key_end)) = &scan.key {
                let (value, value_range) = match &scan.value {
                    Some((text, start, end)) => {
                        (Some(text.clone()), Some(range(line_no, *start, *end)))
                    }
                    None => (None, None),
                };
                let node = OutlineNode {
                    key: Some(key.clone()),
                    key_range: Some(range(line_no, *key_start, *key_end)),
                    item: false,
                    item_index: 0,
                    value,
                    value_range,
                    block_scalar: scan.block_scalar,
                    indent: *key_start as u32,
                    line: line_no as u32,
                    range: range(line_no, *key_start, line_end.max(*key_end)),
                    parent: None,
                    children: Vec::new(),
                };
                let idx = outline.attach(&mut stack, node);
                owner = Some((*key_start, idx));
                last = Some(idx);
            }

            if scan.block_scalar {
                block = owner;
            }
        }

        outline.close_ranges();
        outline
    }

    fn shift_first_line(&mut self, by: u32) {
        let shift = |position: &mut Position| {
            if position.line == 0 {
                position.character += by;
            }
        };
        let shift_range = |range: &mut Range| {
            shift(&mut range.start);
            shift(&mut range.end);
        };
        for node in &mut self.nodes {
            shift_range(&mut node.range);
            node.key_range.iter_mut().for_each(shift_range);
            node.value_range.iter_mut().for_each(shift_range);
        }
        self.comments.iter_mut().for_each(shift_range);
    }

    fn attach(&mut self, stack: &mut Vec<usize>, mut node: OutlineNode) -> usize {
        while let Some(&top) = stack.last() {
            let candidate = &self.nodes[top];
            if candidate.indent < node.indent {
                break;
            }
            // `key:` followed by items at the same indent is still a parent.
            if candidate.indent == node.indent
                && node.item
                && !candidate.item
                && candidate.opens_block()
            {
                break;
            }
            stack.pop();
        }

        let idx = self.nodes.len();
        node.parent = stack.last().copied();
        let siblings = match node.parent {
            Some(parent) => &self.nodes[parent].children,
            None => &self.roots,
        };
        if node.item {
            node.item_index = siblings.iter().filter(|&&i| self.nodes[i].item).count();
        }
        match node.parent {
            Some(parent) => self.nodes[parent].children.push(idx),
            None => self.roots.push(idx),
        }
        self.nodes.push(node);
        stack.push(idx);
        idx
    }

    fn extend(&mut self, idx: usize, line: usize, end: usize) {
        let node = &mut self.nodes[idx];
        node.range.end = Position {
            line: line as u32,
            character: end as u32,
        };
    }

    fn close_ranges(&mut self) {
        for idx in (0..self.nodes.len()).rev() {
            let end = self.nodes[idx]
                .children
                .iter()
                .map(|&child| self.nodes[child].range.end)
                .fold(self.nodes[idx].range.end, |acc, end| {
                    if (end.line, end.character) > (acc.line, acc.character) {
                        end
                    } else {
                        acc
                    }
                });
            self.nodes[idx].range.end = end;
        }
    }

    pub fn nodes(&self) -> &[OutlineNode] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &OutlineNode {
        &self.nodes[idx]
    }

    pub fn roots(&self) -> impl Iterator<Item = &OutlineNode> {
        self.roots.iter().map(|&idx| &self.nodes[idx])
    }

    pub fn comments(&self) -> &[Range] {
        &self.comments
    }

    pub fn children(&self, idx: usize) -> impl Iterator<Item = (usize, &OutlineNode)> {
        self.nodes[idx]
            .children
            .iter()
            .map(move |&child| (child, &self.nodes[child]))
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn find(&self, path: &[PathSegment]) -> (Option<usize>, bool) {
        let mut candidates: &[usize] = &self.roots;
        let mut found = None;
        for segment in path {
            let next = match segment {
                PathSegment::Key(key) => candidates
                    .iter()
                    .copied()
                    .find(|&i| self.nodes[i].key.as_deref() == Some(key.as_str())),
                PathSegment::Index(n) => candidates
                    .iter()
                    .copied()
                    .filter(|&i| self.nodes[i].item)
                    .nth(*n),
            };
            match next {
                Some(next) => {
                    found = Some(next);
                    candidates = &self.nodes[next].children;
                }
                None => return (found, false),
            }
        }
        (found, true)
    }

    /// The node at exactly `path`, if the outline reaches that deep.
    pub fn locate(&self, path: &[PathSegment]) -> Option<&OutlineNode> {
        match self.find(path) {
            (Some(idx), true) => Some(&self.nodes[idx]),
            _ => None,
        }
    }

    /// The deepest node along `path`.
    pub fn locate_nearest(&self, path: &[PathSegment]) -> Option<&OutlineNode> {
        self.find(path).0.map(|idx| &self.nodes[idx])
    }

    /// Best range for a path: the key of the node when it has one, else its extent.
    pub fn key_range_for(&self, path: &[PathSegment]) -> Range {
        self.locate_nearest(path)
            .map(|node| node.key_range.unwrap_or(node.range))
            .unwrap_or_default()
    }

    pub fn value_range_for(&self, path: &[PathSegment]) -> Range {
        self.locate_nearest(path)
            .map(|node| node.value_range.or(node.key_range).unwrap_or(node.range))
            .unwrap_or_default()
    }

    pub fn path_of(&self, idx: usize) -> Vec<PathSegment> {
        let mut path = Vec::new();
        let mut current = Some(idx);
        while let Some(i) = current {
            let node = &self.nodes[i];
            match &node.key {
                Some(key) => path.push(PathSegment::Key(key.clone())),
                None => path.push(PathSegment::Index(node.item_index)),
            }
            current = node.parent;
        }
        path.reverse();
        path
    }

    /// Keys of the node and all of its ancestors, outermost first.
    pub fn key_chain(&self, idx: usize) -> Vec<&str> {
        self.path_of_keys(Some(idx))
    }

    fn path_of_keys(&self, idx: Option<usize>) -> Vec<&str> {
        let mut keys = Vec::new();
        let mut current = idx;
        while let Some(i) = current {
            if let Some(key) = &self.nodes[i].key {
                keys.push(key.as_str());
            }
            current = self.nodes[i].parent;
        }
        keys.reverse();
        keys
    }

    pub fn nodes_on_line(&self, line: u32) -> impl Iterator<Item = (usize, &OutlineNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, node)| node.line == line)
    }

    pub fn cursor_context(&self, text: &str, position: Position) -> CursorContext {
        let chars = text
            .split('\n')
            .nth(position.line as usize)
            .map(line_chars)
            .unwrap_or_default();
        let col = (position.character as usize).min(chars.len());
        let prefix: String = {
            let start = chars[..col]
                .iter()
                .rposition(|c| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')))
                .map(|p| p + 1)
                .unwrap_or(0);
            chars[start..col].iter().collect()
        };

        if let Some((idx, node)) = self.nodes_on_line(position.line).last() {
            if let (Some(key), Some(key_range)) = (&node.key, node.key_range) {
                if col as u32 > key_range.end.character {
                    return CursorContext {
                        path: self.path_of(idx),
                        value_of: Some(key.clone()),
                        item_scalar: false,
                        prefix,
                    };
                }
                return CursorContext {
                    path: node.parent.map(|p| self.path_of(p)).unwrap_or_default(),
                    value_of: None,
                    item_scalar: false,
                    prefix,
                };
            }
            if node.item && col as u32 > node.indent {
                return CursorContext {
                    path: self.path_of(idx),
                    value_of: None,
                    item_scalar: true,
                    prefix,
                };
            }
        }

        // Blank or partial line: the enclosing node is the nearest preceding
        // node (or ancestor of it) that is indented less than the cursor.
        let indent = chars.iter().take_while(|c| is_blank(**c)).count().min(col) as u32;
        let enclosing = self
            .nodes
            .iter()
            .rposition(|node| node.line < position.line)
            .and_then(|mut idx| loop {
                let node = &self.nodes[idx];
                if node.indent < indent && (node.opens_block() || node.item) {
                    return Some(idx);
                }
                idx = node.parent?;
            });

        CursorContext {
            path: enclosing.map(|idx| self.path_of(idx)).unwrap_or_default(),
            value_of: None,
            item_scalar: false,
            prefix,
        }
    }
}

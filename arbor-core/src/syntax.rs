//! Narrow access to syntax tree nodes: kind, span, children, text.
//!
//! Everything outside this module and the cache reads trees through these
//! helpers so results never alias the underlying tree.

use serde::Serialize;
use tree_sitter::Node;

/// Byte and line/column span (rows and columns are 0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_row: usize,
    pub start_column: usize,
    pub end_row: usize,
    pub end_column: usize,
}

impl Span {
    pub fn of(node: &Node) -> Self {
        let start = node.start_position();
        let end = node.end_position();
        Self {
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_row: start.row,
            start_column: start.column,
            end_row: end.row,
            end_column: end.column,
        }
    }

    /// 1-based first line, as editors number it
    pub fn start_line(&self) -> usize {
        self.start_row + 1
    }

    pub fn end_line(&self) -> usize {
        self.end_row + 1
    }

    pub fn line_count(&self) -> usize {
        self.end_row - self.start_row + 1
    }

    /// Whether (row, column) lies within this span, end inclusive
    pub fn contains_point(&self, row: usize, column: usize) -> bool {
        (row, column) >= (self.start_row, self.start_column)
            && (row, column) <= (self.end_row, self.end_column)
    }
}

/// Source text of a node; invalid UTF-8 is replaced
pub fn node_text(node: &Node, source: &[u8]) -> String {
    source
        .get(node.start_byte()..node.end_byte())
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default()
}

/// Truncate on a char boundary, marking the cut with an ellipsis
pub fn truncate_text(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => (format!("{}…", &text[..cut]), true),
        None => (text.to_string(), false),
    }
}

/// Named node kinds in pre-order, the sequence structural similarity runs on
pub fn kind_sequence(node: &Node) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    let mut cursor = node.walk();
    loop {
        let current = cursor.node();
        if current.is_named() {
            kinds.push(current.kind());
        }
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.node() == *node {
                return kinds;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return kinds;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    fn parse(source: &str) -> tree_sitter::Tree {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .unwrap();
        parser.parse(source, None).unwrap()
    }

    #[test]
    fn test_span_and_text() {
        let source = "def f():\n    return 1\n";
        let tree = parse(source);
        let func = tree.root_node().child(0).unwrap();
        let span = Span::of(&func);
        assert_eq!(span.start_line(), 1);
        assert_eq!(span.end_line(), 2);
        assert!(span.contains_point(1, 4));
        assert!(!span.contains_point(3, 0));
        assert!(node_text(&func, source.as_bytes()).starts_with("def f()"));
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("abc", 5), ("abc".to_string(), false));
        assert_eq!(truncate_text("héllo", 2), ("hé…".to_string(), true));
    }

    #[test]
    fn test_kind_sequence_stays_inside_node() {
        let source = "def f():\n    return 1\n\nx = 2\n";
        let tree = parse(source);
        let func = tree.root_node().child(0).unwrap();
        let kinds = kind_sequence(&func);
        assert_eq!(kinds[0], "function_definition");
        assert!(kinds.contains(&"return_statement"));
        assert!(!kinds.contains(&"assignment"));
    }
}

//! Depth- and breadth-bounded projections of syntax trees
//!
//! A single tree cursor is shared across the walk, so memory held during
//! traversal is proportional to the emitted depth. Results are plain owned
//! values and never borrow from the tree.

use crate::syntax::{node_text, truncate_text, Span};
use serde::Serialize;
use tree_sitter::{Node, Point, TreeCursor};

/// Upper bound on requested depth, whatever the caller asks for
pub const MAX_TRAVERSAL_DEPTH: usize = 256;

/// Characters of leaf text kept when text is requested
pub const MAX_NODE_TEXT_CHARS: usize = 200;

/// Output-only projection of a syntax node
#[derive(Debug, Clone, Serialize)]
pub struct BoundedNode {
    pub kind: String,
    pub named: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub span: Span,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Children in the underlying tree, emitted or not
    pub child_count: usize,
    /// Children were elided by the depth or breadth limit
    pub truncated: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BoundedNode>,
}

impl BoundedNode {
    fn project(node: &Node, field: Option<&str>, source: &[u8], include_text: bool) -> Self {
        let text = (include_text && node.child_count() == 0).then(|| {
            let (text, _) = truncate_text(&node_text(node, source), MAX_NODE_TEXT_CHARS);
            text
        });
        Self {
            kind: node.kind().to_string(),
            named: node.is_named(),
            field: field.map(String::from),
            span: Span::of(node),
            text,
            child_count: node.child_count(),
            truncated: false,
            children: Vec::new(),
        }
    }

    /// Total emitted nodes
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(BoundedNode::node_count).sum::<usize>()
    }
}

/// Restrict traversal to a half-open byte range or a 1-based inclusive line range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanFilter {
    Bytes { start: usize, end: usize },
    Lines { start: usize, end: usize },
}

impl SpanFilter {
    fn overlaps(&self, node: &Node) -> bool {
        match *self {
            Self::Bytes { start, end } => node.start_byte() < end && node.end_byte() > start,
            Self::Lines { start, end } => {
                let first = start.saturating_sub(1);
                let last = end.saturating_sub(1);
                node.start_position().row <= last && node.end_position().row >= first
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TraversalOptions {
    pub max_depth: usize,
    /// Children emitted per node; 0 means unlimited
    pub max_children: usize,
    pub include_text: bool,
    pub range: Option<SpanFilter>,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_children: 0,
            include_text: false,
            range: None,
        }
    }
}

/// Project `root` into a bounded tree
pub fn bounded_tree(root: Node, source: &[u8], options: &TraversalOptions) -> BoundedNode {
    let options = TraversalOptions {
        max_depth: options.max_depth.min(MAX_TRAVERSAL_DEPTH),
        ..options.clone()
    };
    let mut cursor = root.walk();
    walk(&mut cursor, None, source, 0, &options)
}

fn walk(
    cursor: &mut TreeCursor,
    field: Option<&str>,
    source: &[u8],
    depth: usize,
    options: &TraversalOptions,
) -> BoundedNode {
    let node = cursor.node();
    let mut out = BoundedNode::project(&node, field, source, options.include_text);
    if node.child_count() == 0 {
        return out;
    }
    if depth >= options.max_depth {
        out.truncated = true;
        return out;
    }

    if cursor.goto_first_child() {
        loop {
            let child = cursor.node();
            let wanted = options.range.map_or(true, |r| r.overlaps(&child));
            if wanted {
                if options.max_children > 0 && out.children.len() == options.max_children {
                    out.truncated = true;
                    break;
                }
                let field = cursor.field_name();
                out.children.push(walk(cursor, field, source, depth + 1, options));
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
        cursor.goto_parent();
    }
    out
}

/// Path from `root` to the smallest node enclosing (row, column), both
/// 0-based. Each element carries no children; `truncated` marks nodes
/// that have some. Returns `None` when the point lies outside the source.
///
/// The root starts at its first token, so a point in leading or trailing
/// blank lines is enclosed by the root alone.
pub fn node_path_at(
    root: Node,
    source: &[u8],
    row: usize,
    column: usize,
    include_text: bool,
) -> Option<Vec<BoundedNode>> {
    if !within_source(source, row, column) {
        return None;
    }
    let target = if Span::of(&root).contains_point(row, column) {
        let point = Point { row, column };
        root.descendant_for_point_range(point, point)?
    } else {
        root
    };

    let mut chain = vec![target];
    let mut current = target;
    while let Some(parent) = current.parent() {
        chain.push(parent);
        current = parent;
    }
    chain.reverse();

    let last = chain.len() - 1;
    Some(
        chain
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let mut bounded =
                    BoundedNode::project(node, None, source, include_text && i == last);
                bounded.truncated = node.child_count() > 0;
                bounded
            })
            .collect(),
    )
}

/// Columns may sit one past the last byte of a line
fn within_source(source: &[u8], row: usize, column: usize) -> bool {
    source
        .split(|&b| b == b'\n')
        .nth(row)
        .is_some_and(|line| column <= line.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::{Parser, Tree};

    const SOURCE: &str = "\
class Greeter:
    def hello(self, name):
        if name:
            return f\"hi {name}\"
        return None

def top():
    return Greeter()
";

    fn parse(source: &str) -> Tree {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .unwrap();
        parser.parse(source, None).unwrap()
    }

    fn max_depth_seen(node: &BoundedNode, depth: usize) -> usize {
        node.children
            .iter()
            .map(|c| max_depth_seen(c, depth + 1))
            .max()
            .unwrap_or(depth)
    }

    fn assert_cut_at(node: &BoundedNode, depth: usize, limit: usize) {
        if depth == limit {
            assert!(node.children.is_empty());
            assert_eq!(node.truncated, node.child_count > 0);
        }
        for child in &node.children {
            assert_cut_at(child, depth + 1, limit);
        }
    }

    #[test]
    fn test_depth_limit_holds_for_every_depth() {
        let tree = parse(SOURCE);
        for limit in 0..8 {
            let options = TraversalOptions {
                max_depth: limit,
                ..Default::default()
            };
            let bounded = bounded_tree(tree.root_node(), SOURCE.as_bytes(), &options);
            assert!(max_depth_seen(&bounded, 0) <= limit);
            assert_cut_at(&bounded, 0, limit);
        }
    }

    #[test]
    fn test_depth_zero_is_root_only() {
        let tree = parse(SOURCE);
        let options = TraversalOptions {
            max_depth: 0,
            ..Default::default()
        };
        let bounded = bounded_tree(tree.root_node(), SOURCE.as_bytes(), &options);
        assert_eq!(bounded.kind, "module");
        assert!(bounded.truncated);
        assert_eq!(bounded.child_count, 2);
        assert_eq!(bounded.node_count(), 1);
    }

    #[test]
    fn test_breadth_limit() {
        let tree = parse("a = 1\nb = 2\nc = 3\nd = 4\n");
        let options = TraversalOptions {
            max_depth: 1,
            max_children: 2,
            ..Default::default()
        };
        let bounded = bounded_tree(tree.root_node(), b"a = 1\nb = 2\nc = 3\nd = 4\n", &options);
        assert_eq!(bounded.children.len(), 2);
        assert_eq!(bounded.child_count, 4);
        assert!(bounded.truncated);
    }

    #[test]
    fn test_line_range_skips_outside_subtrees() {
        let tree = parse(SOURCE);
        let options = TraversalOptions {
            max_depth: 2,
            range: Some(SpanFilter::Lines { start: 7, end: 8 }),
            ..Default::default()
        };
        let bounded = bounded_tree(tree.root_node(), SOURCE.as_bytes(), &options);
        assert_eq!(bounded.children.len(), 1);
        assert_eq!(bounded.children[0].kind, "function_definition");
        assert_eq!(bounded.children[0].span.start_line(), 7);
    }

    #[test]
    fn test_byte_range_is_half_open() {
        let tree = parse(SOURCE);
        let class_end = SOURCE.find("return None").unwrap() + "return None".len();
        let top_start = SOURCE.find("def top").unwrap();
        let kinds = |start: usize, end: usize| -> Vec<String> {
            let options = TraversalOptions {
                max_depth: 1,
                range: Some(SpanFilter::Bytes { start, end }),
                ..Default::default()
            };
            bounded_tree(tree.root_node(), SOURCE.as_bytes(), &options)
                .children
                .into_iter()
                .map(|c| c.kind)
                .collect()
        };

        // A node ending exactly at `start` is outside
        assert_eq!(kinds(class_end, top_start + 3), vec!["function_definition"]);
        // A node starting exactly at `end` is outside
        assert_eq!(kinds(class_end - 1, top_start), vec!["class_definition"]);
        assert_eq!(kinds(0, SOURCE.len()).len(), 2);
    }

    #[test]
    fn test_fields_and_text() {
        let source = "def f():\n    pass\n";
        let tree = parse(source);
        let options = TraversalOptions {
            max_depth: 3,
            include_text: true,
            ..Default::default()
        };
        let bounded = bounded_tree(tree.root_node(), source.as_bytes(), &options);
        let func = &bounded.children[0];
        let name = func
            .children
            .iter()
            .find(|c| c.field.as_deref() == Some("name"))
            .unwrap();
        assert_eq!(name.kind, "identifier");
        assert_eq!(name.text.as_deref(), Some("f"));
        // inner nodes carry no text
        assert!(func.text.is_none());
    }

    #[test]
    fn test_node_path_at_position() {
        let tree = parse(SOURCE);
        // "name" in `if name:` on row 2
        let path = node_path_at(tree.root_node(), SOURCE.as_bytes(), 2, 12, true).unwrap();
        assert_eq!(path[0].kind, "module");
        let last = path.last().unwrap();
        assert_eq!(last.kind, "identifier");
        assert_eq!(last.text.as_deref(), Some("name"));
        assert!(path.iter().any(|n| n.kind == "if_statement"));
        assert!(path.iter().all(|n| n.children.is_empty()));
        // spans nest from root to leaf
        for pair in path.windows(2) {
            assert!(pair[0].span.start_byte <= pair[1].span.start_byte);
            assert!(pair[0].span.end_byte >= pair[1].span.end_byte);
        }
    }

    #[test]
    fn test_node_path_outside_tree() {
        let tree = parse(SOURCE);
        assert!(node_path_at(tree.root_node(), SOURCE.as_bytes(), 500, 0, false).is_none());
        // Row exists but the column is past its end
        assert!(node_path_at(tree.root_node(), SOURCE.as_bytes(), 0, 200, false).is_none());
    }

    #[test]
    fn test_node_path_in_leading_blank_lines() {
        let source = "\n\n# header\ndef f():\n    return 1\n";
        let tree = parse(source);
        assert!(tree.root_node().start_position().row > 0);

        for row in [0, 1] {
            let path = node_path_at(tree.root_node(), source.as_bytes(), row, 0, false).unwrap();
            assert_eq!(path.len(), 1);
            assert_eq!(path[0].kind, "module");
        }

        let path = node_path_at(tree.root_node(), source.as_bytes(), 3, 4, true).unwrap();
        let last = path.last().unwrap();
        assert_eq!(last.kind, "identifier");
        assert_eq!(last.text.as_deref(), Some("f"));
    }
}

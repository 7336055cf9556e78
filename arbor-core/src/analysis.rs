//! Derived analyses over parsed trees: complexity, dependencies,
//! structural similarity and project overview.

use crate::cache::ParsedTree;
use crate::languages::{language_for_path, LanguageHandle};
use crate::query::{QueryEngine, SymbolSet};
use crate::syntax::{kind_sequence, node_text, truncate_text, Span};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tree_sitter::{Node, QueryCursor, StreamingIterator, TreeCursor};

/// Nodes that add a branch to cyclomatic complexity
fn decision_kinds(language: &str) -> &'static [&'static str] {
    match language {
        "python" => &[
            "if_statement",
            "elif_clause",
            "for_statement",
            "while_statement",
            "except_clause",
            "conditional_expression",
            "case_clause",
            "and",
            "or",
        ],
        "rust" => &[
            "if_expression",
            "match_arm",
            "for_expression",
            "while_expression",
            "loop_expression",
            "&&",
            "||",
            "?",
        ],
        "javascript" | "typescript" | "tsx" => &[
            "if_statement",
            "for_statement",
            "for_in_statement",
            "while_statement",
            "do_statement",
            "switch_case",
            "catch_clause",
            "ternary_expression",
            "&&",
            "||",
            "??",
        ],
        "go" => &[
            "if_statement",
            "for_statement",
            "expression_case",
            "type_case",
            "communication_case",
            "&&",
            "||",
        ],
        _ => &[],
    }
}

/// Nodes that open a nesting level
fn nesting_kinds(language: &str) -> &'static [&'static str] {
    match language {
        "python" => &[
            "if_statement",
            "for_statement",
            "while_statement",
            "try_statement",
            "with_statement",
            "match_statement",
        ],
        "rust" => &[
            "if_expression",
            "match_expression",
            "for_expression",
            "while_expression",
            "loop_expression",
        ],
        "javascript" | "typescript" | "tsx" => &[
            "if_statement",
            "for_statement",
            "for_in_statement",
            "while_statement",
            "do_statement",
            "switch_statement",
            "try_statement",
        ],
        "go" => &[
            "if_statement",
            "for_statement",
            "expression_switch_statement",
            "type_switch_statement",
            "select_statement",
        ],
        _ => &[],
    }
}

fn is_comment(node: &Node) -> bool {
    matches!(node.kind(), "comment" | "line_comment" | "block_comment")
}

/// Pre-order walk; `visit(node, depth_in_nesting)` is called once per node
fn walk_nodes<F>(root: Node, nesting: &[&str], mut visit: F)
where
    F: FnMut(&Node, usize),
{
    let mut cursor: TreeCursor = root.walk();
    // Nesting-level flags for every node on the current path
    let mut opened: Vec<bool> = Vec::new();
    let mut level = 0;
    loop {
        let node = cursor.node();
        let opens = node.is_named() && nesting.contains(&node.kind());
        if opens {
            level += 1;
        }
        opened.push(opens);
        visit(&node, level);

        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if opened.pop() == Some(true) {
                level -= 1;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplexityReport {
    pub path: String,
    pub language: String,
    pub total_lines: usize,
    pub code_lines: usize,
    pub comment_lines: usize,
    pub blank_lines: usize,
    pub function_count: usize,
    pub class_count: usize,
    /// 1 + decision points
    pub cyclomatic_complexity: usize,
    pub max_nesting_depth: usize,
    pub avg_function_lines: f64,
    pub has_errors: bool,
}

pub fn complexity(parsed: &ParsedTree, symbols: &SymbolSet) -> ComplexityReport {
    let language = parsed.language();
    let text = String::from_utf8_lossy(parsed.source());
    let lines: Vec<&str> = text.lines().collect();
    let decisions = decision_kinds(language);

    let mut decision_count = 0;
    let mut max_nesting = 0;
    let mut comment_rows = BTreeSet::new();
    walk_nodes(parsed.root(), nesting_kinds(language), |node, level| {
        max_nesting = max_nesting.max(level);
        if decisions.contains(&node.kind()) {
            decision_count += 1;
        }
        if is_comment(node) {
            let start = node.start_position();
            let code_before = lines
                .get(start.row)
                .and_then(|line| line.get(..start.column))
                .is_some_and(|prefix| !prefix.trim().is_empty());
            let first = if code_before { start.row + 1 } else { start.row };
            for row in first..=node.end_position().row {
                comment_rows.insert(row);
            }
        }
    });

    let blank_lines = lines.iter().filter(|l| l.trim().is_empty()).count();
    let comment_lines = comment_rows
        .iter()
        .filter(|&&row| lines.get(row).is_some_and(|l| !l.trim().is_empty()))
        .count();
    let function_lines: usize = symbols.functions.iter().map(|f| f.span.line_count()).sum();
    let avg_function_lines = if symbols.functions.is_empty() {
        0.0
    } else {
        function_lines as f64 / symbols.functions.len() as f64
    };

    ComplexityReport {
        path: parsed.display_path(),
        language: language.to_string(),
        total_lines: lines.len(),
        code_lines: lines.len() - blank_lines - comment_lines,
        comment_lines,
        blank_lines,
        function_count: symbols.functions.len(),
        class_count: symbols.classes.len(),
        cyclomatic_complexity: 1 + decision_count,
        max_nesting_depth: max_nesting,
        avg_function_lines,
        has_errors: parsed.has_errors(),
    }
}

const IMPORT_KINDS: &[&str] = &[
    "import_statement",
    "import_from_statement",
    "use_declaration",
    "extern_crate_declaration",
    "import_spec",
    "call_expression",
];

/// One import edge out of a file
#[derive(Debug, Clone, Serialize)]
pub struct DependencyEdge {
    pub module: String,
    /// Statement that introduced the edge
    pub kind: String,
    /// 1-based
    pub line: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyReport {
    pub path: String,
    pub language: String,
    pub dependencies: Vec<DependencyEdge>,
}

pub fn dependencies(
    engine: &QueryEngine,
    language: &LanguageHandle,
    parsed: &ParsedTree,
) -> crate::Result<DependencyReport> {
    let query = engine.template_query(language, "dependencies")?;
    let names = query.capture_names();
    let source = parsed.source();

    let mut edges = Vec::new();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, parsed.root(), source);
    while let Some(m) = matches.next() {
        for capture in m.captures {
            if names[capture.index as usize] != "module" {
                continue;
            }
            let node = capture.node;
            let mut statement = node;
            while let Some(parent) = statement.parent() {
                statement = parent;
                if IMPORT_KINDS.contains(&statement.kind()) {
                    break;
                }
            }
            edges.push(DependencyEdge {
                module: node_text(&node, source)
                    .trim_matches(|c| c == '"' || c == '\'' || c == '`')
                    .to_string(),
                kind: statement.kind().to_string(),
                line: node.start_position().row + 1,
            });
        }
    }
    edges.sort_by_key(|e| e.line);

    Ok(DependencyReport {
        path: parsed.display_path(),
        language: language.id().to_string(),
        dependencies: edges,
    })
}

/// Structural fingerprint of a snippet: top node kind and kind bigrams
#[derive(Debug, Clone)]
pub struct StructureProfile {
    pub kind: String,
    bigrams: HashMap<(&'static str, &'static str), usize>,
    size: usize,
}

impl StructureProfile {
    pub fn of(node: &Node) -> Self {
        let kinds = kind_sequence(node);
        let mut bigrams = HashMap::new();
        if kinds.len() == 1 {
            bigrams.insert((kinds[0], ""), 1);
        }
        for pair in kinds.windows(2) {
            *bigrams.entry((pair[0], pair[1])).or_insert(0) += 1;
        }
        let size = bigrams.values().sum();
        Self {
            kind: node.kind().to_string(),
            bigrams,
            size,
        }
    }

    /// Dice coefficient over kind bigram multisets
    pub fn similarity(&self, other: &Self) -> f64 {
        if self.size + other.size == 0 {
            return 0.0;
        }
        let shared: usize = self
            .bigrams
            .iter()
            .map(|(gram, count)| other.bigrams.get(gram).map_or(0, |c| (*c).min(*count)))
            .sum();
        2.0 * shared as f64 / (self.size + other.size) as f64
    }
}

/// The construct a snippet stands for: descend through wrappers that have
/// a single named child (module, expression_statement, source_file).
pub fn snippet_root(root: Node) -> Node {
    let mut node = root;
    while node.named_child_count() == 1 {
        match node.named_child(0) {
            Some(child) if node.kind() != "block" => node = child,
            _ => break,
        }
        if matches!(
            node.kind(),
            "function_definition"
                | "class_definition"
                | "function_item"
                | "function_declaration"
                | "method_definition"
                | "method_declaration"
                | "class_declaration"
        ) {
            break;
        }
    }
    node
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarMatch {
    pub path: String,
    pub kind: String,
    pub span: Span,
    pub score: f64,
    pub preview: String,
}

/// Nodes in `parsed` of the profile's kind scoring at least `threshold`
pub fn similar_in(
    parsed: &ParsedTree,
    profile: &StructureProfile,
    threshold: f64,
) -> Vec<SimilarMatch> {
    let source = parsed.source();
    let mut found = Vec::new();
    walk_nodes(parsed.root(), &[], |node, _| {
        if node.kind() != profile.kind {
            return;
        }
        let score = profile.similarity(&StructureProfile::of(node));
        if score >= threshold {
            let text = node_text(node, source);
            let first = text.lines().next().unwrap_or_default().trim();
            found.push(SimilarMatch {
                path: parsed.display_path(),
                kind: node.kind().to_string(),
                span: Span::of(node),
                score: (score * 1000.0).round() / 1000.0,
                preview: truncate_text(first, 120).0,
            });
        }
    });
    found
}

/// Order by descending score, then location
pub fn rank_similar(mut matches: Vec<SimilarMatch>, max_results: usize) -> Vec<SimilarMatch> {
    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.span.start_byte.cmp(&b.span.start_byte))
    });
    matches.truncate(max_results);
    matches
}

/// Build manifests recognized by `project_overview`
const MANIFESTS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "tsconfig.json",
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "requirements.txt",
    "go.mod",
    "Makefile",
];

#[derive(Debug, Clone, Serialize)]
pub struct ProjectOverview {
    pub project: String,
    pub root: String,
    pub total_files: usize,
    pub languages: BTreeMap<String, usize>,
    pub directories: Vec<String>,
    pub manifests: Vec<String>,
}

/// Summarize a project's file list
pub fn project_overview(project: &str, root: &Path, files: &[String]) -> ProjectOverview {
    let mut languages = BTreeMap::new();
    let mut directories = BTreeSet::new();
    let mut manifests = Vec::new();

    for file in files {
        let path = Path::new(file);
        if let Some(language) = language_for_path(path) {
            *languages.entry(language.to_string()).or_insert(0) += 1;
        }
        if let Some((top, _)) = file.split_once('/') {
            directories.insert(top.to_string());
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if MANIFESTS.contains(&name) {
            manifests.push(file.clone());
        }
    }

    ProjectOverview {
        project: project.to_string(),
        root: root.display().to_string(),
        total_files: files.len(),
        languages,
        directories: directories.into_iter().collect(),
        manifests,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{parse_source, CacheSettings, TreeCache};
    use crate::config::Config;
    use crate::files::{FileAccessor, SecurityPolicy};
    use crate::languages::LanguageRegistry;
    use crate::projects::ProjectRegistry;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn parsed(file: &str, content: &str) -> (TempDir, Arc<ParsedTree>, Arc<LanguageHandle>) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(file), content).unwrap();
        let project = ProjectRegistry::new()
            .register(dir.path(), Some("an"), None)
            .unwrap();
        let files = FileAccessor::new(SecurityPolicy::from_config(&Config::default()));
        let resolved = files.resolve(&project, file).unwrap();
        let bytes = files.read_bytes(&resolved).unwrap();
        let handle = LanguageRegistry::new().for_path(Path::new(file)).unwrap();
        let tree = TreeCache::new(CacheSettings::default())
            .get_or_parse(&resolved, bytes, &handle)
            .unwrap();
        (dir, tree, handle)
    }

    #[test]
    fn test_python_complexity() {
        let source = "\
# helpers

def classify(n):
    # sign
    if n > 0 and n < 10:
        return 'small'
    elif n >= 10:
        for i in range(n):
            while i:
                i -= 1
        return 'big'
    return 'neg'  # fallthrough
";
        let (_dir, tree, python) = parsed("c.py", source);
        let engine = QueryEngine::new();
        let symbols = engine.symbols(&python, &tree).unwrap();
        let report = complexity(&tree, &symbols);

        assert_eq!(report.total_lines, 12);
        assert_eq!(report.blank_lines, 1);
        assert_eq!(report.comment_lines, 2);
        assert_eq!(report.code_lines, 9);
        assert_eq!(report.function_count, 1);
        // if, and, elif, for, while
        assert_eq!(report.cyclomatic_complexity, 6);
        assert_eq!(report.max_nesting_depth, 3);
        assert_eq!(report.avg_function_lines, 10.0);
    }

    #[test]
    fn test_go_dependencies() {
        let source = "package main\n\nimport (\n\t\"fmt\"\n\tstr \"strings\"\n)\n\nfunc main() { fmt.Println(str.ToUpper(\"x\")) }\n";
        let (_dir, tree, go) = parsed("main.go", source);
        let report = dependencies(&QueryEngine::new(), &go, &tree).unwrap();
        let modules: Vec<&str> = report.dependencies.iter().map(|d| d.module.as_str()).collect();
        assert_eq!(modules, vec!["fmt", "strings"]);
        assert_eq!(report.dependencies[0].kind, "import_spec");
        assert_eq!(report.dependencies[0].line, 4);
    }

    #[test]
    fn test_python_dependency_kinds() {
        let (_dir, tree, python) = parsed("m.py", "import os.path as p\nfrom . import sib\n");
        let report = dependencies(&QueryEngine::new(), &python, &tree).unwrap();
        assert_eq!(report.dependencies.len(), 2);
        assert_eq!(report.dependencies[0].module, "os.path");
        assert_eq!(report.dependencies[0].kind, "import_statement");
        assert_eq!(report.dependencies[1].kind, "import_from_statement");
    }

    #[test]
    fn test_similarity_prefers_same_shape() {
        let source = "\
def add(a, b):
    return a + b

def sub(a, b):
    return a - b

def noisy(items):
    for item in items:
        if item:
            print(item)
";
        let (_dir, tree, python) = parsed("s.py", source);
        let snippet = "def mul(x, y):\n    return x * y\n";
        let snippet_tree = parse_source(&python, Path::new("snippet"), snippet.as_bytes()).unwrap();
        let root = snippet_root(snippet_tree.root_node());
        assert_eq!(root.kind(), "function_definition");

        let profile = StructureProfile::of(&root);
        let ranked = rank_similar(similar_in(&tree, &profile, 0.5), 10);
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].preview.starts_with("def add"));
        assert_eq!(ranked[0].score, 1.0);
        assert!(ranked.iter().all(|m| !m.preview.contains("noisy")));
    }

    #[test]
    fn test_project_overview() {
        let files = vec![
            "Cargo.toml".to_string(),
            "src/lib.rs".to_string(),
            "src/main.rs".to_string(),
            "tools/gen.py".to_string(),
            "README.md".to_string(),
        ];
        let overview = project_overview("p", Path::new("/tmp/p"), &files);
        assert_eq!(overview.total_files, 5);
        assert_eq!(overview.languages.get("rust"), Some(&2));
        assert_eq!(overview.languages.get("python"), Some(&1));
        assert_eq!(overview.directories, vec!["src", "tools"]);
        assert_eq!(overview.manifests, vec!["Cargo.toml"]);
    }
}

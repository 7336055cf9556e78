//! Structural pattern queries over parsed trees
//!
//! Holds the per-language query templates, compiles and runs queries, and
//! derives symbol lists from the templates. Compiled templates are cached
//! per language; ad-hoc queries are compiled on every call.

use crate::cache::ParsedTree;
use crate::error::ArborError;
use crate::languages::LanguageHandle;
use crate::syntax::{node_text, truncate_text, Span};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tree_sitter::{Query, QueryCursor, StreamingIterator};

/// Characters of captured text returned per match
pub const MAX_CAPTURE_TEXT_CHARS: usize = 500;

/// A named, versioned query for one language
#[derive(Debug, Clone, Serialize)]
pub struct QueryTemplate {
    pub language: &'static str,
    pub name: &'static str,
    pub version: u32,
    pub description: &'static str,
    pub source: &'static str,
}

const fn template(
    language: &'static str,
    name: &'static str,
    version: u32,
    description: &'static str,
    source: &'static str,
) -> QueryTemplate {
    QueryTemplate {
        language,
        name,
        version,
        description,
        source,
    }
}

const FUNCTIONS: &str = "Function and method definitions";
const CLASSES: &str = "Class, struct and type definitions";
const IMPORTS: &str = "Import statements";
const DEPENDENCIES: &str = "Imported module names";
const CALLS: &str = "Call sites";

const JS_FUNCTIONS: &str = r#"
(function_declaration name: (identifier) @function.name) @function.def
(method_definition name: (property_identifier) @function.name) @function.def
(variable_declarator
  name: (identifier) @function.name
  value: [(arrow_function) (function_expression)]) @function.def
"#;

const JS_DEPENDENCIES: &str = r#"
(import_statement source: (string) @module)
(call_expression
  function: (identifier) @_require
  arguments: (arguments (string) @module)
  (#eq? @_require "require"))
"#;

const TS_CLASSES: &str = r#"
(class_declaration name: (type_identifier) @class.name) @class.def
(interface_declaration name: (type_identifier) @class.name) @class.def
(enum_declaration name: (identifier) @class.name) @class.def
(type_alias_declaration name: (type_identifier) @class.name) @class.def
"#;

const JS_CALLS: &str = r#"
(call_expression function: [(identifier) (member_expression)] @call.name) @call
"#;

/// Every bundled template
pub static TEMPLATES: &[QueryTemplate] = &[
    // python
    template(
        "python",
        "functions",
        1,
        FUNCTIONS,
        "(function_definition name: (identifier) @function.name) @function.def",
    ),
    template(
        "python",
        "classes",
        1,
        CLASSES,
        "(class_definition name: (identifier) @class.name) @class.def",
    ),
    template(
        "python",
        "imports",
        1,
        IMPORTS,
        "(import_statement) @import\n(import_from_statement) @import",
    ),
    template(
        "python",
        "dependencies",
        1,
        DEPENDENCIES,
        r#"
(import_statement name: (dotted_name) @module)
(import_statement name: (aliased_import name: (dotted_name) @module))
(import_from_statement module_name: (dotted_name) @module)
(import_from_statement module_name: (relative_import) @module)
"#,
    ),
    template(
        "python",
        "calls",
        1,
        CALLS,
        "(call function: [(identifier) (attribute)] @call.name) @call",
    ),
    // rust
    template(
        "rust",
        "functions",
        1,
        FUNCTIONS,
        "(function_item name: (identifier) @function.name) @function.def",
    ),
    template(
        "rust",
        "classes",
        1,
        CLASSES,
        r#"
(struct_item name: (type_identifier) @class.name) @class.def
(enum_item name: (type_identifier) @class.name) @class.def
(trait_item name: (type_identifier) @class.name) @class.def
(type_item name: (type_identifier) @class.name) @class.def
"#,
    ),
    template(
        "rust",
        "imports",
        1,
        IMPORTS,
        "(use_declaration) @import\n(extern_crate_declaration) @import",
    ),
    template(
        "rust",
        "dependencies",
        1,
        DEPENDENCIES,
        r#"
(use_declaration argument: (_) @module)
(extern_crate_declaration name: (identifier) @module)
"#,
    ),
    template(
        "rust",
        "calls",
        1,
        CALLS,
        r#"
(call_expression function: [(identifier) (field_expression) (scoped_identifier)] @call.name) @call
(macro_invocation macro: (identifier) @call.name) @call
"#,
    ),
    // javascript
    template("javascript", "functions", 1, FUNCTIONS, JS_FUNCTIONS),
    template(
        "javascript",
        "classes",
        1,
        CLASSES,
        "(class_declaration name: (identifier) @class.name) @class.def",
    ),
    template("javascript", "imports", 1, IMPORTS, "(import_statement) @import"),
    template("javascript", "dependencies", 1, DEPENDENCIES, JS_DEPENDENCIES),
    template("javascript", "calls", 1, CALLS, JS_CALLS),
    // typescript
    template("typescript", "functions", 1, FUNCTIONS, JS_FUNCTIONS),
    template("typescript", "classes", 1, CLASSES, TS_CLASSES),
    template("typescript", "imports", 1, IMPORTS, "(import_statement) @import"),
    template("typescript", "dependencies", 1, DEPENDENCIES, JS_DEPENDENCIES),
    template("typescript", "calls", 1, CALLS, JS_CALLS),
    // tsx
    template("tsx", "functions", 1, FUNCTIONS, JS_FUNCTIONS),
    template("tsx", "classes", 1, CLASSES, TS_CLASSES),
    template("tsx", "imports", 1, IMPORTS, "(import_statement) @import"),
    template("tsx", "dependencies", 1, DEPENDENCIES, JS_DEPENDENCIES),
    template("tsx", "calls", 1, CALLS, JS_CALLS),
    // go
    template(
        "go",
        "functions",
        1,
        FUNCTIONS,
        r#"
(function_declaration name: (identifier) @function.name) @function.def
(method_declaration name: (field_identifier) @function.name) @function.def
"#,
    ),
    template(
        "go",
        "classes",
        1,
        CLASSES,
        "(type_spec name: (type_identifier) @class.name) @class.def",
    ),
    template("go", "imports", 1, IMPORTS, "(import_declaration) @import"),
    template(
        "go",
        "dependencies",
        1,
        DEPENDENCIES,
        "(import_spec path: (interpreted_string_literal) @module)",
    ),
    template(
        "go",
        "calls",
        1,
        CALLS,
        "(call_expression function: [(identifier) (selector_expression)] @call.name) @call",
    ),
];

/// Templates for a language, in table order
pub fn templates_for(language: &str) -> Vec<&'static QueryTemplate> {
    TEMPLATES.iter().filter(|t| t.language == language).collect()
}

pub fn find_template(language: &str, name: &str) -> crate::Result<&'static QueryTemplate> {
    TEMPLATES
        .iter()
        .find(|t| t.language == language && t.name == name)
        .ok_or_else(|| ArborError::TemplateNotFound {
            language: language.to_string(),
            name: name.to_string(),
        })
}

/// One capture of one match, detached from the tree
#[derive(Debug, Clone, Serialize)]
pub struct QueryMatch {
    pub path: String,
    pub capture: String,
    pub kind: String,
    pub span: Span,
    pub text: String,
}

/// Run a compiled query over a tree, stopping after `limit` captures.
/// Captures whose name starts with `_` are helpers and are skipped.
pub fn collect_matches(query: &Query, parsed: &ParsedTree, limit: usize) -> Vec<QueryMatch> {
    let names = query.capture_names();
    let source = parsed.source();
    let path = parsed.display_path();
    let mut out = Vec::new();

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, parsed.root(), source);
    while let Some(m) = matches.next() {
        for capture in m.captures {
            let name = names[capture.index as usize];
            if name.starts_with('_') {
                continue;
            }
            if out.len() >= limit {
                return out;
            }
            let (text, _) =
                truncate_text(&node_text(&capture.node, source), MAX_CAPTURE_TEXT_CHARS);
            out.push(QueryMatch {
                path: path.clone(),
                capture: name.to_string(),
                kind: capture.node.kind().to_string(),
                span: Span::of(&capture.node),
                text,
            });
        }
    }
    out
}

/// A named definition or import found by the symbol templates
#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub name: String,
    pub kind: String,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolSet {
    pub path: String,
    pub language: String,
    pub functions: Vec<Symbol>,
    pub classes: Vec<Symbol>,
    pub imports: Vec<Symbol>,
}

/// Identifier-like node kinds searched by `usage_query`
const IDENTIFIER_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "field_identifier",
    "property_identifier",
    "shorthand_property_identifier",
];

/// Compiles templates once per language and runs the derived operations
#[derive(Default)]
pub struct QueryEngine {
    compiled: RwLock<HashMap<(String, &'static str), Arc<Query>>>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled template, cached after the first compile
    pub fn template_query(
        &self,
        language: &LanguageHandle,
        name: &str,
    ) -> crate::Result<Arc<Query>> {
        let template = find_template(language.id(), name)?;
        let key = (language.id().to_string(), template.name);
        if let Some(query) = self
            .compiled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(Arc::clone(query));
        }
        let query = Arc::new(language.compile_query(template.source)?);
        self.compiled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&query));
        Ok(query)
    }

    /// Functions, classes and imports of one parsed file
    pub fn symbols(
        &self,
        language: &LanguageHandle,
        parsed: &ParsedTree,
    ) -> crate::Result<SymbolSet> {
        let functions = self.named_definitions(language, parsed, "functions", "function")?;
        let classes = self.named_definitions(language, parsed, "classes", "class")?;

        let import_query = self.template_query(language, "imports")?;
        let imports = collect_matches(&import_query, parsed, usize::MAX)
            .into_iter()
            .map(|m| Symbol {
                name: m.text.lines().next().unwrap_or_default().trim().to_string(),
                kind: m.kind,
                span: m.span,
            })
            .collect();

        Ok(SymbolSet {
            path: parsed.display_path(),
            language: language.id().to_string(),
            functions,
            classes,
            imports,
        })
    }

    /// Pair `<prefix>.name` captures with their `<prefix>.def` node
    fn named_definitions(
        &self,
        language: &LanguageHandle,
        parsed: &ParsedTree,
        template: &str,
        prefix: &str,
    ) -> crate::Result<Vec<Symbol>> {
        let query = self.template_query(language, template)?;
        let names = query.capture_names();
        let name_capture = format!("{}.name", prefix);
        let def_capture = format!("{}.def", prefix);
        let source = parsed.source();

        let mut symbols = Vec::new();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, parsed.root(), source);
        while let Some(m) = matches.next() {
            let mut name = None;
            let mut def = None;
            for capture in m.captures {
                let capture_name = names[capture.index as usize];
                if capture_name == name_capture {
                    name = Some(node_text(&capture.node, source));
                } else if capture_name == def_capture {
                    def = Some(capture.node);
                }
            }
            if let (Some(name), Some(def)) = (name, def) {
                symbols.push(Symbol {
                    name,
                    kind: def.kind().to_string(),
                    span: Span::of(&def),
                });
            }
        }
        symbols.sort_by_key(|s| s.span.start_byte);
        symbols.dedup_by_key(|s| s.span.start_byte);
        Ok(symbols)
    }

    /// Import edges of one parsed file
    pub fn dependency_matches(
        &self,
        language: &LanguageHandle,
        parsed: &ParsedTree,
    ) -> crate::Result<Vec<QueryMatch>> {
        let query = self.template_query(language, "dependencies")?;
        Ok(collect_matches(&query, parsed, usize::MAX))
    }
}

/// Query matching identifier nodes whose text equals `symbol`
pub fn usage_query(language: &LanguageHandle, symbol: &str) -> crate::Result<String> {
    let valid = !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    if !valid {
        return Err(ArborError::InvalidArgument(format!(
            "'{}' is not an identifier",
            symbol
        )));
    }
    let grammar = language.language();
    let kinds: Vec<String> = IDENTIFIER_KINDS
        .iter()
        .filter(|k| {
            let id = grammar.id_for_node_kind(k, true);
            id != 0 && grammar.node_kind_is_visible(id)
        })
        .map(|k| format!("({})", k))
        .collect();
    Ok(format!(
        "([{}] @usage (#eq? @usage \"{}\"))",
        kinds.join(" "),
        symbol
    ))
}

/// Combine several templates into one query source, compile-checked
pub fn build_query(language: &LanguageHandle, names: &[String]) -> crate::Result<String> {
    if names.is_empty() {
        return Err(ArborError::InvalidArgument(
            "at least one template name is required".to_string(),
        ));
    }
    let mut parts = Vec::with_capacity(names.len());
    for name in names {
        let template = find_template(language.id(), name)?;
        parts.push(format!(
            "; {} v{}\n{}",
            template.name,
            template.version,
            template.source.trim()
        ));
    }
    let combined = parts.join("\n\n");
    language.compile_query(&combined)?;
    Ok(combined)
}

/// Grammar vocabulary shared by typescript and tsx
fn vocabulary(language: &str) -> &str {
    match language {
        "tsx" => "typescript",
        other => other,
    }
}

/// Node kinds that play the same role across grammars
const CONCEPTS: &[(&str, &[(&str, &str)])] = &[
    (
        "function",
        &[
            ("python", "function_definition"),
            ("rust", "function_item"),
            ("javascript", "function_declaration"),
            ("typescript", "function_declaration"),
            ("go", "function_declaration"),
        ],
    ),
    (
        "class",
        &[
            ("python", "class_definition"),
            ("rust", "struct_item"),
            ("javascript", "class_declaration"),
            ("typescript", "class_declaration"),
            ("go", "type_spec"),
        ],
    ),
    (
        "call",
        &[
            ("python", "call"),
            ("rust", "call_expression"),
            ("javascript", "call_expression"),
            ("typescript", "call_expression"),
            ("go", "call_expression"),
        ],
    ),
    (
        "import",
        &[
            ("python", "import_statement"),
            ("rust", "use_declaration"),
            ("javascript", "import_statement"),
            ("typescript", "import_statement"),
            ("go", "import_declaration"),
        ],
    ),
    (
        "string",
        &[
            ("python", "string"),
            ("rust", "string_literal"),
            ("javascript", "string"),
            ("typescript", "string"),
            ("go", "interpreted_string_literal"),
        ],
    ),
    (
        "if",
        &[
            ("python", "if_statement"),
            ("rust", "if_expression"),
            ("javascript", "if_statement"),
            ("typescript", "if_statement"),
            ("go", "if_statement"),
        ],
    ),
    (
        "for",
        &[
            ("python", "for_statement"),
            ("rust", "for_expression"),
            ("javascript", "for_statement"),
            ("typescript", "for_statement"),
            ("go", "for_statement"),
        ],
    ),
    (
        "while",
        &[
            ("python", "while_statement"),
            ("rust", "while_expression"),
            ("javascript", "while_statement"),
            ("typescript", "while_statement"),
        ],
    ),
    (
        "return",
        &[
            ("python", "return_statement"),
            ("rust", "return_expression"),
            ("javascript", "return_statement"),
            ("typescript", "return_statement"),
            ("go", "return_statement"),
        ],
    ),
    (
        "block",
        &[
            ("python", "block"),
            ("rust", "block"),
            ("javascript", "statement_block"),
            ("typescript", "statement_block"),
            ("go", "block"),
        ],
    ),
    (
        "parameters",
        &[
            ("python", "parameters"),
            ("rust", "parameters"),
            ("javascript", "formal_parameters"),
            ("typescript", "formal_parameters"),
            ("go", "parameter_list"),
        ],
    ),
    (
        "arguments",
        &[
            ("python", "argument_list"),
            ("rust", "arguments"),
            ("javascript", "arguments"),
            ("typescript", "arguments"),
            ("go", "argument_list"),
        ],
    ),
    (
        "comment",
        &[
            ("python", "comment"),
            ("rust", "line_comment"),
            ("javascript", "comment"),
            ("typescript", "comment"),
            ("go", "comment"),
        ],
    ),
    (
        "assignment",
        &[
            ("python", "assignment"),
            ("rust", "assignment_expression"),
            ("javascript", "assignment_expression"),
            ("typescript", "assignment_expression"),
            ("go", "assignment_statement"),
        ],
    ),
    (
        "lambda",
        &[
            ("python", "lambda"),
            ("rust", "closure_expression"),
            ("javascript", "arrow_function"),
            ("typescript", "arrow_function"),
            ("go", "func_literal"),
        ],
    ),
];

/// Map one node kind between grammars via the concept table
pub fn map_node_kind(kind: &str, from: &str, to: &str) -> Option<&'static str> {
    let (from, to) = (vocabulary(from), vocabulary(to));
    CONCEPTS.iter().find_map(|(_, kinds)| {
        kinds
            .iter()
            .any(|(lang, k)| *lang == from && *k == kind)
            .then(|| kinds.iter().find(|(lang, _)| *lang == to).map(|(_, k)| *k))
            .flatten()
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct KindMapping {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdaptedQuery {
    pub from_language: String,
    pub to_language: String,
    pub query: String,
    pub mapped: Vec<KindMapping>,
    /// Kinds with no counterpart in the target grammar, left as written
    pub unmapped: Vec<String>,
    /// Compile error against the target grammar, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rewrite node kinds in `source` from one grammar's vocabulary to another's
pub fn adapt_query(source: &str, from: &LanguageHandle, to: &LanguageHandle) -> AdaptedQuery {
    let mut out = String::with_capacity(source.len());
    let mut mapped: Vec<KindMapping> = Vec::new();
    let mut unmapped: Vec<String> = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        match c {
            '"' => {
                // String literal: copy through to the closing quote
                out.push(c);
                let mut escaped = false;
                for (_, s) in chars.by_ref() {
                    out.push(s);
                    if escaped {
                        escaped = false;
                    } else if s == '\\' {
                        escaped = true;
                    } else if s == '"' {
                        break;
                    }
                }
            }
            ';' => {
                out.push(c);
                for (_, s) in chars.by_ref() {
                    out.push(s);
                    if s == '\n' {
                        break;
                    }
                }
            }
            '(' => {
                out.push(c);
                while let Some(&(_, ws)) = chars.peek() {
                    if !ws.is_whitespace() {
                        break;
                    }
                    out.push(ws);
                    chars.next();
                }
                let start = chars.peek().map(|&(j, _)| j).unwrap_or(source.len());
                let mut end = start;
                while let Some(&(j, k)) = chars.peek() {
                    if !(k.is_ascii_alphanumeric() || k == '_') {
                        break;
                    }
                    end = j + k.len_utf8();
                    chars.next();
                }
                let kind = &source[start..end];
                if kind.is_empty() || kind == "_" {
                    out.push_str(kind);
                    continue;
                }
                match map_node_kind(kind, from.id(), to.id()) {
                    Some(target) => {
                        if target != kind && !mapped.iter().any(|m| m.from == kind) {
                            mapped.push(KindMapping {
                                from: kind.to_string(),
                                to: target.to_string(),
                            });
                        }
                        out.push_str(target);
                    }
                    None => {
                        if !to.has_node_kind(kind) && !unmapped.iter().any(|u| u == kind) {
                            unmapped.push(kind.to_string());
                        }
                        out.push_str(kind);
                    }
                }
            }
            _ => out.push(c),
        }
    }

    let error = to.compile_query(&out).err().map(|e| e.to_string());
    AdaptedQuery {
        from_language: from.id().to_string(),
        to_language: to.id().to_string(),
        query: out,
        mapped,
        unmapped,
        error,
    }
}

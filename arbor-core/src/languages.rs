//! Language registry: grammar handles by language identifier
//!
//! Handles are constructed lazily on first use and shared for the process
//! lifetime. Identifiers that fail to load are remembered so repeated
//! requests do not retry the load; `recheck` forces a retry.

use crate::error::ArborError;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tree_sitter::{Language, Parser, Query};

type GrammarFn = fn() -> Language;

fn rust_grammar() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}
fn python_grammar() -> Language {
    tree_sitter_python::LANGUAGE.into()
}
fn javascript_grammar() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}
fn typescript_grammar() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}
fn tsx_grammar() -> Language {
    tree_sitter_typescript::LANGUAGE_TSX.into()
}
fn go_grammar() -> Language {
    tree_sitter_go::LANGUAGE.into()
}

/// Grammars bundled with this build
const GRAMMARS: &[(&str, GrammarFn)] = &[
    ("go", go_grammar),
    ("javascript", javascript_grammar),
    ("python", python_grammar),
    ("rust", rust_grammar),
    ("tsx", tsx_grammar),
    ("typescript", typescript_grammar),
];

/// Normalize a user-supplied identifier (case, common aliases)
pub fn normalize_language_id(id: &str) -> String {
    let id = id.trim().to_lowercase();
    match id.as_str() {
        "py" | "python3" => "python".to_string(),
        "rs" => "rust".to_string(),
        "js" | "jsx" | "node" => "javascript".to_string(),
        "ts" => "typescript".to_string(),
        "golang" => "go".to_string(),
        _ => id,
    }
}

/// Guess the language of a file from its extension
pub fn language_for_path(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => Some("rust"),
        Some("py" | "pyi") => Some("python"),
        Some("js" | "jsx" | "mjs" | "cjs") => Some("javascript"),
        Some("ts" | "mts" | "cts") => Some("typescript"),
        Some("tsx") => Some("tsx"),
        Some("go") => Some("go"),
        _ => None,
    }
}

/// A loaded grammar: parser and query construction for one language
#[derive(Debug)]
pub struct LanguageHandle {
    id: String,
    language: Language,
}

impl LanguageHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    /// Fresh parser bound to this grammar (parsers are not shared across threads)
    pub fn parser(&self) -> crate::Result<Parser> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .map_err(|e| ArborError::LanguageUnavailable {
                language: self.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(parser)
    }

    /// Compile a query against this grammar
    pub fn compile_query(&self, source: &str) -> crate::Result<Query> {
        Query::new(&self.language, source).map_err(|e| ArborError::QueryError {
            offset: e.offset,
            row: e.row,
            column: e.column,
            message: if e.message.is_empty() {
                format!("{:?}", e.kind)
            } else {
                e.message
            },
        })
    }

    /// Whether the grammar defines a node kind (named or anonymous)
    pub fn has_node_kind(&self, kind: &str) -> bool {
        self.language.id_for_node_kind(kind, true) != 0
            || self.language.id_for_node_kind(kind, false) != 0
    }

    /// Visible named node kinds, sorted and deduplicated
    pub fn node_types(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = (0..self.language.node_kind_count() as u16)
            .filter(|&id| {
                self.language.node_kind_is_named(id) && self.language.node_kind_is_visible(id)
            })
            .filter_map(|id| self.language.node_kind_for_id(id))
            .collect();
        kinds.sort_unstable();
        kinds.dedup();
        kinds
    }
}

/// Availability snapshot for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct LanguageStatus {
    pub supported: Vec<String>,
    pub loaded: Vec<String>,
    pub failed: BTreeMap<String, String>,
}

#[derive(Default)]
struct RegistryState {
    loaded: HashMap<String, Arc<LanguageHandle>>,
    failed: HashMap<String, String>,
}

/// Lazy, process-lifetime registry of language handles
pub struct LanguageRegistry {
    grammars: HashMap<&'static str, GrammarFn>,
    state: RwLock<RegistryState>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::with_grammars(GRAMMARS)
    }

    fn with_grammars(grammars: &[(&'static str, GrammarFn)]) -> Self {
        Self {
            grammars: grammars.iter().copied().collect(),
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Get a handle, constructing it on first use
    pub fn get(&self, language_id: &str) -> crate::Result<Arc<LanguageHandle>> {
        let id = normalize_language_id(language_id);
        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            if let Some(handle) = state.loaded.get(&id) {
                return Ok(Arc::clone(handle));
            }
            if let Some(reason) = state.failed.get(&id) {
                return Err(ArborError::LanguageUnavailable {
                    language: id,
                    reason: reason.clone(),
                });
            }
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        // Another writer may have finished the load while we waited
        if let Some(handle) = state.loaded.get(&id) {
            return Ok(Arc::clone(handle));
        }
        if let Some(reason) = state.failed.get(&id) {
            return Err(ArborError::LanguageUnavailable {
                language: id,
                reason: reason.clone(),
            });
        }
        self.load_locked(&mut state, id)
    }

    fn load_locked(
        &self,
        state: &mut RegistryState,
        id: String,
    ) -> crate::Result<Arc<LanguageHandle>> {
        match self.construct(&id) {
            Ok(handle) => {
                tracing::debug!(language = %id, "loaded language grammar");
                let handle = Arc::new(handle);
                state.failed.remove(&id);
                state.loaded.insert(id, Arc::clone(&handle));
                Ok(handle)
            }
            Err(reason) => {
                tracing::warn!(language = %id, %reason, "language grammar unavailable");
                state.failed.insert(id.clone(), reason.clone());
                Err(ArborError::LanguageUnavailable {
                    language: id,
                    reason,
                })
            }
        }
    }

    fn construct(&self, id: &str) -> Result<LanguageHandle, String> {
        let grammar = self
            .grammars
            .get(id)
            .ok_or_else(|| "no grammar bundled for this language".to_string())?;
        let language = grammar();
        // Rejects grammars built for an incompatible ABI
        Parser::new()
            .set_language(&language)
            .map_err(|e| e.to_string())?;
        Ok(LanguageHandle {
            id: id.to_string(),
            language,
        })
    }

    /// Supported identifiers (bundled grammars not known to have failed)
    pub fn list(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = self
            .grammars
            .keys()
            .filter(|id| !state.failed.contains_key(**id))
            .map(|id| id.to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Availability without forcing construction
    pub fn is_available(&self, language_id: &str) -> bool {
        let id = normalize_language_id(language_id);
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.loaded.contains_key(&id) {
            return true;
        }
        if state.failed.contains_key(&id) {
            return false;
        }
        self.grammars.contains_key(id.as_str())
    }

    /// Forget a remembered failure and retry construction
    pub fn recheck(&self, language_id: &str) -> crate::Result<Arc<LanguageHandle>> {
        let id = normalize_language_id(language_id);
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = state.loaded.get(&id) {
            return Ok(Arc::clone(handle));
        }
        state.failed.remove(&id);
        self.load_locked(&mut state, id)
    }

    /// Load a set of languages up front; failures are remembered, not returned
    pub fn preload(&self, ids: &[String]) {
        for id in ids {
            let _ = self.get(id);
        }
    }

    pub fn status(&self) -> LanguageStatus {
        let supported = self.list();
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut loaded: Vec<String> = state.loaded.keys().cloned().collect();
        loaded.sort();
        LanguageStatus {
            supported,
            loaded,
            failed: state
                .failed
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Handle for a file, detected from its extension
    pub fn for_path(&self, path: &Path) -> crate::Result<Arc<LanguageHandle>> {
        let id = language_for_path(path)
            .ok_or_else(|| ArborError::LanguageNotDetected(path.to_path_buf()))?;
        self.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_caches_handle() {
        let registry = LanguageRegistry::new();
        let a = registry.get("python").unwrap();
        let b = registry.get("PY").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.id(), "python");
    }

    #[test]
    fn test_is_available_does_not_load() {
        let registry = LanguageRegistry::new();
        assert!(registry.is_available("rust"));
        assert!(registry.status().loaded.is_empty());
        assert!(!registry.is_available("cobol"));
    }

    #[test]
    fn test_failure_is_remembered() {
        let registry = LanguageRegistry::new();
        let err = registry.get("cobol").unwrap_err();
        assert!(matches!(err, ArborError::LanguageUnavailable { .. }));
        assert!(registry.status().failed.contains_key("cobol"));
        assert!(!registry.is_available("cobol"));
        // Still remembered; recheck retries and fails again
        assert!(registry.get("cobol").is_err());
        assert!(registry.recheck("cobol").is_err());
    }

    #[test]
    fn test_recheck_clears_failure_when_grammar_loads() {
        let registry = LanguageRegistry::with_grammars(GRAMMARS);
        registry
            .state
            .write()
            .unwrap()
            .failed
            .insert("go".to_string(), "simulated".to_string());
        assert!(!registry.is_available("go"));
        assert!(!registry.list().contains(&"go".to_string()));
        assert!(registry.recheck("go").is_ok());
        assert!(registry.is_available("go"));
    }

    #[test]
    fn test_lazy_and_preloaded_agree() {
        let lazy = LanguageRegistry::new();
        let eager = LanguageRegistry::new();
        eager.preload(&["rust".to_string(), "go".to_string()]);
        assert_eq!(lazy.list(), eager.list());
        let a = lazy.get("rust").unwrap();
        let b = eager.get("rust").unwrap();
        assert_eq!(a.node_types(), b.node_types());
    }

    #[test]
    fn test_language_for_path() {
        assert_eq!(language_for_path(Path::new("a.py")), Some("python"));
        assert_eq!(language_for_path(Path::new("src/main.rs")), Some("rust"));
        assert_eq!(language_for_path(Path::new("app.tsx")), Some("tsx"));
        assert_eq!(language_for_path(Path::new("main.go")), Some("go"));
        assert_eq!(language_for_path(Path::new("data.csv")), None);
    }

    #[test]
    fn test_compile_query_reports_offset() {
        let registry = LanguageRegistry::new();
        let python = registry.get("python").unwrap();
        assert!(python
            .compile_query("(function_definition name: (identifier) @name)")
            .is_ok());
        match python.compile_query("(function_definition (not_a_real_kind))") {
            Err(ArborError::QueryError {
                offset, message, ..
            }) => {
                assert!(offset > 0);
                assert!(!message.is_empty());
            }
            other => panic!("expected query error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_node_types() {
        let registry = LanguageRegistry::new();
        let python = registry.get("python").unwrap();
        let kinds = python.node_types();
        assert!(kinds.contains(&"function_definition"));
        assert!(python.has_node_kind("class_definition"));
        assert!(!python.has_node_kind("struct_item"));
    }
}

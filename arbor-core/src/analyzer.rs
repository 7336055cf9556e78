//! The `Analyzer` facade: owns the registries, the file accessor, the
//! parse tree cache and the query engine, and exposes every operation.
//!
//! One instance is shared (behind an `Arc`) by all request handlers.

use crate::analysis::{
    self, ComplexityReport, DependencyReport, ProjectOverview, SimilarMatch, StructureProfile,
};
use crate::cache::{parse_source, CacheSettings, CacheStats, ParsedTree, TreeCache};
use crate::config::Config;
use crate::error::ArborError;
use crate::files::{FileAccessor, FileContent, FileMetadata, ListOptions, SecurityPolicy};
use crate::languages::{
    language_for_path, normalize_language_id, LanguageHandle, LanguageRegistry, LanguageStatus,
};
use crate::projects::{Project, ProjectRegistry};
use crate::query::{self, AdaptedQuery, QueryEngine, QueryMatch, QueryTemplate, SymbolSet};
use crate::search::{self, TextMatch, TextSearch, TextSearchOptions};
use crate::traverse::{self, BoundedNode, SpanFilter, TraversalOptions};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tree_sitter::Query;

/// Options for `get_ast`; unset fields fall back to configuration
#[derive(Debug, Clone, Default)]
pub struct AstOptions {
    pub max_depth: Option<usize>,
    pub max_children: Option<usize>,
    pub include_text: bool,
    pub range: Option<SpanFilter>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AstResult {
    pub project: String,
    pub path: String,
    pub language: String,
    pub has_errors: bool,
    pub max_depth: usize,
    pub root: BoundedNode,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodePath {
    pub project: String,
    pub path: String,
    pub language: String,
    pub row: usize,
    pub column: usize,
    /// Root first, smallest enclosing node last
    pub nodes: Vec<BoundedNode>,
}

/// Options for `find_text`
#[derive(Debug, Clone)]
pub struct FindTextOptions {
    pub search: TextSearchOptions,
    pub file_pattern: Option<String>,
    pub max_results: Option<usize>,
}

/// Snapshot returned by `diagnose_config`
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub version: &'static str,
    pub config: Config,
    pub cache: CacheStats,
    pub languages: LanguageStatus,
    pub project_count: usize,
}

pub struct Analyzer {
    config: Arc<Config>,
    projects: ProjectRegistry,
    languages: LanguageRegistry,
    files: FileAccessor,
    cache: TreeCache,
    queries: QueryEngine,
}

impl Analyzer {
    pub fn new(config: Config) -> Self {
        let cache = TreeCache::new(CacheSettings {
            enabled: config.cache.enabled,
            max_bytes: config.cache_max_bytes(),
            ttl: config.cache_ttl(),
        });
        let languages = LanguageRegistry::new();
        languages.preload(&config.language.preferred_languages);
        tracing::debug!(
            cache_enabled = config.cache.enabled,
            cache_max_bytes = config.cache_max_bytes(),
            preloaded = ?config.language.preferred_languages,
            "analyzer ready"
        );
        Self {
            files: FileAccessor::new(SecurityPolicy::from_config(&config)),
            config: Arc::new(config),
            projects: ProjectRegistry::new(),
            languages,
            cache,
            queries: QueryEngine::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &TreeCache {
        &self.cache
    }

    pub fn language_registry(&self) -> &LanguageRegistry {
        &self.languages
    }

    fn default_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.config.max_results_default)
    }

    // -- projects -------------------------------------------------------

    pub fn register_project(
        &self,
        path: &Path,
        name: Option<&str>,
        description: Option<&str>,
    ) -> crate::Result<Arc<Project>> {
        let project = self.projects.register(path, name, description)?;
        self.cache.activate_project(&project.name);
        Ok(project)
    }

    pub fn list_projects(&self) -> Vec<Arc<Project>> {
        self.projects.list()
    }

    pub fn get_project(&self, name: &str) -> crate::Result<Arc<Project>> {
        self.projects.get(name)
    }

    /// Remove a project and every cache entry scoped to it. Parses still
    /// running for the project finish but are not cached.
    pub fn remove_project(&self, name: &str) -> bool {
        let removed = self.projects.remove(name);
        if removed {
            let evicted = self.cache.retire_project(name);
            tracing::debug!(project = name, evicted, "removed project");
        }
        removed
    }

    // -- languages ------------------------------------------------------

    pub fn list_languages(&self) -> Vec<String> {
        self.languages.list()
    }

    /// With `recheck`, a remembered load failure is forgotten and the
    /// grammar is constructed again
    pub fn check_language_available(&self, language: &str, recheck: bool) -> bool {
        if recheck {
            return match self.languages.recheck(language) {
                Ok(_) => true,
                Err(err) => {
                    tracing::debug!(language, error = %err, "language recheck failed");
                    false
                }
            };
        }
        self.languages.is_available(language)
    }

    pub fn get_node_types(&self, language: &str) -> crate::Result<Vec<&'static str>> {
        Ok(self.languages.get(language)?.node_types())
    }

    // -- files ----------------------------------------------------------

    pub fn list_files(&self, project: &str, options: &ListOptions) -> crate::Result<Vec<String>> {
        let project = self.projects.get(project)?;
        self.files.list_files(&project, options)
    }

    pub fn get_file(
        &self,
        project: &str,
        path: &str,
        start_line: Option<usize>,
        max_lines: Option<usize>,
    ) -> crate::Result<FileContent> {
        let project = self.projects.get(project)?;
        self.files.read_text(&project, path, start_line, max_lines)
    }

    pub fn get_file_metadata(&self, project: &str, path: &str) -> crate::Result<FileMetadata> {
        let project = self.projects.get(project)?;
        self.files.metadata(&project, path)
    }

    // -- parsing --------------------------------------------------------

    fn language_for(
        &self,
        path: &str,
        explicit: Option<&str>,
    ) -> crate::Result<Arc<LanguageHandle>> {
        match explicit {
            Some(id) => self.languages.get(id),
            None => self.languages.for_path(Path::new(path)),
        }
    }

    /// Resolve, read and parse (or fetch from cache) one project file.
    /// Path validation happens before the cache or any parser is touched.
    pub fn parse_file(
        &self,
        project: &str,
        path: &str,
        language: Option<&str>,
    ) -> crate::Result<(Arc<LanguageHandle>, Arc<ParsedTree>)> {
        let project = self.projects.get(project)?;
        self.parse_in(&project, path, language)
    }

    fn parse_in(
        &self,
        project: &Project,
        path: &str,
        language: Option<&str>,
    ) -> crate::Result<(Arc<LanguageHandle>, Arc<ParsedTree>)> {
        let file = self.files.resolve(project, path)?;
        let handle = self.language_for(path, language)?;
        let bytes = self.files.read_bytes(&file)?;
        let parsed = self.cache.get_or_parse(&file, bytes, &handle)?;
        Ok((handle, parsed))
    }

    /// Parse many files in parallel, skipping (and logging) failures
    fn parse_many<T, F>(
        &self,
        project: &Project,
        paths: &[String],
        handle: &LanguageHandle,
        op: F,
    ) -> Vec<T>
    where
        T: Send,
        F: Fn(&ParsedTree) -> Vec<T> + Sync,
    {
        paths
            .par_iter()
            .flat_map_iter(|path| {
                let parsed = self
                    .files
                    .resolve(project, path)
                    .and_then(|file| {
                        let bytes = self.files.read_bytes(&file)?;
                        self.cache.get_or_parse(&file, bytes, handle)
                    });
                match parsed {
                    Ok(parsed) => op(&parsed),
                    Err(err) => {
                        tracing::debug!(
                            project = %project.name,
                            path = %path,
                            error = %err,
                            "skipping file"
                        );
                        Vec::new()
                    }
                }
            })
            .collect()
    }

    // -- AST ------------------------------------------------------------

    pub fn get_ast(
        &self,
        project: &str,
        path: &str,
        options: &AstOptions,
    ) -> crate::Result<AstResult> {
        let (handle, parsed) = self.parse_file(project, path, options.language.as_deref())?;
        let max_depth = options
            .max_depth
            .unwrap_or(self.config.language.default_max_depth)
            .min(traverse::MAX_TRAVERSAL_DEPTH);
        let traversal = TraversalOptions {
            max_depth,
            max_children: options
                .max_children
                .unwrap_or(self.config.language.max_children),
            include_text: options.include_text,
            range: options.range,
        };
        let root = traverse::bounded_tree(parsed.root(), parsed.source(), &traversal);
        Ok(AstResult {
            project: parsed.project().to_string(),
            path: parsed.display_path(),
            language: handle.id().to_string(),
            has_errors: parsed.has_errors(),
            max_depth,
            root,
        })
    }

    /// Nodes from the root to the smallest node at a 0-based position
    pub fn get_node_at_position(
        &self,
        project: &str,
        path: &str,
        row: usize,
        column: usize,
        language: Option<&str>,
    ) -> crate::Result<NodePath> {
        let (handle, parsed) = self.parse_file(project, path, language)?;
        let nodes = traverse::node_path_at(parsed.root(), parsed.source(), row, column, true)
            .ok_or_else(|| {
                ArborError::InvalidArgument(format!(
                    "position {}:{} is outside {}",
                    row,
                    column,
                    parsed.display_path()
                ))
            })?;
        Ok(NodePath {
            project: parsed.project().to_string(),
            path: parsed.display_path(),
            language: handle.id().to_string(),
            row,
            column,
            nodes,
        })
    }

    // -- search and queries ---------------------------------------------

    pub fn find_text(
        &self,
        project: &str,
        options: &FindTextOptions,
    ) -> crate::Result<Vec<TextMatch>> {
        let project = self.projects.get(project)?;
        let search = TextSearch::new(&options.search)?;
        let paths = self.files.list_files(
            &project,
            &ListOptions {
                pattern: options.file_pattern.clone(),
                ..Default::default()
            },
        )?;
        Ok(search::search_files(
            &self.files,
            &project,
            &paths,
            &search,
            self.default_limit(options.max_results),
        ))
    }

    /// Run a query on one file, or on every project file of `language`.
    /// The query is compiled before any file is read or parsed.
    pub fn run_query(
        &self,
        project: &str,
        query_source: &str,
        language: Option<&str>,
        path: Option<&str>,
        max_results: Option<usize>,
    ) -> crate::Result<Vec<QueryMatch>> {
        let project = self.projects.get(project)?;
        let limit = self.default_limit(max_results);
        let handle = match (language, path) {
            (Some(id), _) => self.languages.get(id)?,
            (None, Some(path)) => self.languages.for_path(Path::new(path))?,
            (None, None) => {
                return Err(ArborError::InvalidArgument(
                    "either language or path is required".to_string(),
                ))
            }
        };
        let compiled = handle.compile_query(query_source)?;

        if let Some(path) = path {
            let (_, parsed) = self.parse_in(&project, path, Some(handle.id()))?;
            return Ok(query::collect_matches(&compiled, &parsed, limit));
        }

        let paths = self.files.files_for_language(&project, handle.id())?;
        let matches = self.parse_many(&project, &paths, &handle, |parsed| {
            query::collect_matches(&compiled, parsed, limit)
        });
        Ok(sort_and_limit(matches, limit))
    }

    pub fn list_query_templates(
        &self,
        language: &str,
    ) -> crate::Result<Vec<&'static QueryTemplate>> {
        let handle = self.languages.get(language)?;
        Ok(query::templates_for(handle.id()))
    }

    pub fn get_query_template(
        &self,
        language: &str,
        name: &str,
    ) -> crate::Result<&'static QueryTemplate> {
        query::find_template(&normalize_language_id(language), name)
    }

    pub fn build_query(&self, language: &str, templates: &[String]) -> crate::Result<String> {
        let handle = self.languages.get(language)?;
        query::build_query(&handle, templates)
    }

    pub fn adapt_query(
        &self,
        query_source: &str,
        from: &str,
        to: &str,
    ) -> crate::Result<AdaptedQuery> {
        let from = self.languages.get(from)?;
        let to = self.languages.get(to)?;
        Ok(query::adapt_query(query_source, &from, &to))
    }

    pub fn get_symbols(&self, project: &str, path: &str) -> crate::Result<SymbolSet> {
        let (handle, parsed) = self.parse_file(project, path, None)?;
        self.queries.symbols(&handle, &parsed)
    }

    /// Identifier occurrences of `symbol` across the project.
    /// `scope` is a glob over root-relative paths.
    pub fn find_usage(
        &self,
        project: &str,
        symbol: &str,
        scope: Option<&str>,
        language: Option<&str>,
        max_results: Option<usize>,
    ) -> crate::Result<Vec<QueryMatch>> {
        let project = self.projects.get(project)?;
        let limit = self.default_limit(max_results);
        let only = language.map(|id| self.languages.get(id)).transpose()?;
        let paths = self.files.list_files(
            &project,
            &ListOptions {
                pattern: scope.map(String::from),
                ..Default::default()
            },
        )?;

        let mut by_language: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
        for path in paths {
            if let Some(id) = language_for_path(Path::new(&path)) {
                if only.as_ref().map_or(true, |h| h.id() == id) {
                    by_language.entry(id).or_default().push(path);
                }
            }
        }

        let mut matches = Vec::new();
        for (id, paths) in by_language {
            let handle = match self.languages.get(id) {
                Ok(handle) => handle,
                Err(err) => {
                    tracing::debug!(
                        language = id,
                        error = %err,
                        "skipping language in usage search"
                    );
                    continue;
                }
            };
            let compiled: Query = handle.compile_query(&query::usage_query(&handle, symbol)?)?;
            matches.extend(self.parse_many(&project, &paths, &handle, |parsed| {
                query::collect_matches(&compiled, parsed, limit)
            }));
        }
        Ok(sort_and_limit(matches, limit))
    }

    // -- analysis -------------------------------------------------------

    pub fn analyze_project(&self, project: &str) -> crate::Result<ProjectOverview> {
        let project = self.projects.get(project)?;
        let files = self.files.list_files(&project, &ListOptions::default())?;
        Ok(analysis::project_overview(&project.name, &project.root, &files))
    }

    pub fn analyze_complexity(&self, project: &str, path: &str) -> crate::Result<ComplexityReport> {
        let (handle, parsed) = self.parse_file(project, path, None)?;
        let symbols = self.queries.symbols(&handle, &parsed)?;
        Ok(analysis::complexity(&parsed, &symbols))
    }

    pub fn get_dependencies(&self, project: &str, path: &str) -> crate::Result<DependencyReport> {
        let (handle, parsed) = self.parse_file(project, path, None)?;
        analysis::dependencies(&self.queries, &handle, &parsed)
    }

    /// Rank project constructs structurally similar to `snippet`.
    /// The snippet is parsed off-cache.
    pub fn find_similar_code(
        &self,
        project: &str,
        snippet: &str,
        language: &str,
        threshold: f64,
        max_results: Option<usize>,
    ) -> crate::Result<Vec<SimilarMatch>> {
        let project = self.projects.get(project)?;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ArborError::InvalidArgument(format!(
                "threshold {} is outside 0.0..=1.0",
                threshold
            )));
        }
        let handle = self.languages.get(language)?;
        let tree = parse_source(&handle, Path::new("<snippet>"), snippet.as_bytes())?;
        let profile = StructureProfile::of(&analysis::snippet_root(tree.root_node()));

        let paths = self.files.files_for_language(&project, handle.id())?;
        let found = self.parse_many(&project, &paths, &handle, |parsed| {
            analysis::similar_in(parsed, &profile, threshold)
        });
        Ok(analysis::rank_similar(found, self.default_limit(max_results)))
    }

    // -- cache and diagnostics ------------------------------------------

    /// Clear the whole cache, or only one project's entries
    pub fn clear_cache(&self, project: Option<&str>) -> crate::Result<usize> {
        match project {
            Some(name) => {
                let project = self.projects.get(name)?;
                Ok(self.cache.invalidate_project(&project.name))
            }
            None => Ok(self.cache.clear()),
        }
    }

    pub fn diagnose_config(&self) -> Diagnostics {
        Diagnostics {
            version: env!("CARGO_PKG_VERSION"),
            config: (*self.config).clone(),
            cache: self.cache.stats(),
            languages: self.languages.status(),
            project_count: self.projects.len(),
        }
    }
}

fn sort_and_limit(mut matches: Vec<QueryMatch>, limit: usize) -> Vec<QueryMatch> {
    matches.sort_by(|a, b| {
        a.path
            .cmp(&b.path)
            .then(a.span.start_byte.cmp(&b.span.start_byte))
    });
    matches.truncate(limit);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Analyzer) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        std::fs::write(
            dir.path().join("pkg/core.py"),
            "def helper(x):\n    return x\n\nclass Engine:\n    def run(self):\n        return helper(1)\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("main.py"),
            "from pkg.core import helper\n\nprint(helper(2))\n",
        )
        .unwrap();
        let analyzer = Analyzer::new(Config::default());
        analyzer
            .register_project(dir.path(), Some("demo"), None)
            .unwrap();
        (dir, analyzer)
    }

    #[test]
    fn test_get_ast_defaults_to_configured_depth() {
        let (_dir, analyzer) = setup();
        let result = analyzer.get_ast("demo", "main.py", &AstOptions::default()).unwrap();
        assert_eq!(result.max_depth, 5);
        assert_eq!(result.language, "python");
        assert!(!result.has_errors);

        let shallow = AstOptions {
            max_depth: Some(1),
            ..Default::default()
        };
        let result = analyzer.get_ast("demo", "main.py", &shallow).unwrap();
        assert!(result.root.children.iter().all(|c| c.children.is_empty()));
    }

    #[test]
    fn test_node_at_position_outside_file() {
        let (_dir, analyzer) = setup();
        assert!(matches!(
            analyzer.get_node_at_position("demo", "main.py", 99, 0, None),
            Err(ArborError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_run_query_requires_language_or_path() {
        let (_dir, analyzer) = setup();
        assert!(matches!(
            analyzer.run_query("demo", "(identifier) @id", None, None, None),
            Err(ArborError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_run_query_project_wide() {
        let (_dir, analyzer) = setup();
        let matches = analyzer
            .run_query(
                "demo",
                "(function_definition name: (identifier) @name)",
                Some("python"),
                None,
                None,
            )
            .unwrap();
        let names: Vec<&str> = matches.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(names, vec!["helper", "run"]);
        assert_eq!(analyzer.cache().entry_count(), 2);
    }

    #[test]
    fn test_find_usage_across_files() {
        let (_dir, analyzer) = setup();
        let usages = analyzer
            .find_usage("demo", "helper", None, None, None)
            .unwrap();
        let locations: Vec<(&str, usize)> = usages
            .iter()
            .map(|m| (m.path.as_str(), m.span.start_line()))
            .collect();
        assert_eq!(
            locations,
            vec![("main.py", 1), ("main.py", 3), ("pkg/core.py", 1), ("pkg/core.py", 6)]
        );

        let scoped = analyzer
            .find_usage("demo", "helper", Some("pkg/**"), None, None)
            .unwrap();
        assert_eq!(scoped.len(), 2);
    }

    #[test]
    fn test_clear_cache_scoped_to_project() {
        let (_dir, analyzer) = setup();
        analyzer.get_symbols("demo", "main.py").unwrap();
        analyzer.get_symbols("demo", "pkg/core.py").unwrap();
        assert_eq!(analyzer.clear_cache(Some("demo")).unwrap(), 2);
        assert!(matches!(
            analyzer.clear_cache(Some("nope")),
            Err(ArborError::ProjectNotFound(_))
        ));
        assert_eq!(analyzer.clear_cache(None).unwrap(), 0);
    }

    #[test]
    fn test_diagnose_config() {
        let (_dir, analyzer) = setup();
        analyzer.get_symbols("demo", "main.py").unwrap();
        let diagnostics = analyzer.diagnose_config();
        assert_eq!(diagnostics.project_count, 1);
        assert_eq!(diagnostics.cache.entries, 1);
        assert!(diagnostics.languages.loaded.contains(&"python".to_string()));
        let json = serde_json::to_value(&diagnostics).unwrap();
        assert_eq!(json["config"]["cache"]["max_size_mb"], 100);
    }

    #[test]
    fn test_find_similar_code_threshold_validation() {
        let (_dir, analyzer) = setup();
        assert!(matches!(
            analyzer.find_similar_code("demo", "x = 1", "python", 1.5, None),
            Err(ArborError::InvalidArgument(_))
        ));
        let found = analyzer
            .find_similar_code("demo", "def other(y):\n    return y\n", "python", 0.9, None)
            .unwrap();
        assert_eq!(found[0].path, "pkg/core.py");
        assert!(found[0].preview.starts_with("def helper"));
    }
}

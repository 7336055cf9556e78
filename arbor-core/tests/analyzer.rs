use arbor_core::{Analyzer, ArborError, AstOptions, BoundedNode, Config};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tempfile::TempDir;

/// Helper to create a project directory with known content
fn create_test_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(
        root.join("a.py"),
        "def greet(name):\n    return 'hello ' + name\n",
    )
    .unwrap();
    std::fs::write(
        root.join("src/lib.rs"),
        r#"
use std::fmt;

pub struct Config {
    name: String,
}

fn add(a: i32, b: i32) -> i32 {
    if a > b { a + b } else { b }
}
"#,
    )
    .unwrap();
    dir
}

fn analyzer_with(config: Config, root: &Path) -> Analyzer {
    let analyzer = Analyzer::new(config);
    analyzer
        .register_project(root, Some("demo"), Some("test project"))
        .unwrap();
    analyzer
}

fn deepest(node: &BoundedNode, depth: usize) -> usize {
    node.children
        .iter()
        .map(|c| deepest(c, depth + 1))
        .max()
        .unwrap_or(depth)
}

fn check_truncation(node: &BoundedNode, depth: usize, limit: usize) {
    if depth == limit && node.child_count > 0 {
        assert!(node.truncated, "{} at depth {} not flagged", node.kind, depth);
        assert!(node.children.is_empty());
    }
    for child in &node.children {
        check_truncation(child, depth + 1, limit);
    }
}

#[test]
fn test_unchanged_file_is_a_cache_hit() {
    let dir = create_test_project();
    let analyzer = analyzer_with(Config::default(), dir.path());

    let (_, first) = analyzer.parse_file("demo", "a.py", None).unwrap();
    let (_, second) = analyzer.parse_file("demo", "a.py", None).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let stats = analyzer.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.parses, 1);
}

#[test]
fn test_modified_file_is_reparsed() {
    let dir = create_test_project();
    let analyzer = analyzer_with(Config::default(), dir.path());

    let before = analyzer.get_symbols("demo", "a.py").unwrap();
    assert_eq!(before.functions[0].name, "greet");

    std::fs::write(
        dir.path().join("a.py"),
        "def greet(name):\n    return name\n\ndef part(name):\n    return name\n",
    )
    .unwrap();
    let after = analyzer.get_symbols("demo", "a.py").unwrap();
    assert_eq!(after.functions.len(), 2);
    assert_eq!(analyzer.cache().project_entry_count("demo"), 1);
    assert_eq!(analyzer.cache().stats().parses, 2);
}

#[test]
fn test_symbols_of_single_function_file() {
    let dir = create_test_project();
    let analyzer = analyzer_with(Config::default(), dir.path());

    let symbols = analyzer.get_symbols("demo", "a.py").unwrap();
    assert_eq!(symbols.language, "python");
    assert_eq!(symbols.functions.len(), 1);
    let greet = &symbols.functions[0];
    assert_eq!(greet.name, "greet");
    assert_eq!(greet.kind, "function_definition");
    assert_eq!(greet.span.start_line(), 1);
    assert_eq!(greet.span.end_line(), 2);
    assert_eq!(greet.span.start_byte, 0);
    assert!(symbols.classes.is_empty());
    assert!(symbols.imports.is_empty());
}

#[test]
fn test_project_removal_clears_its_cache_entries() {
    let dir = create_test_project();
    let other = create_test_project();
    let analyzer = analyzer_with(Config::default(), dir.path());
    analyzer
        .register_project(other.path(), Some("other"), None)
        .unwrap();

    analyzer.get_symbols("demo", "a.py").unwrap();
    analyzer.get_symbols("demo", "src/lib.rs").unwrap();
    analyzer.get_symbols("other", "a.py").unwrap();
    assert_eq!(analyzer.cache().project_entry_count("demo"), 2);

    assert!(analyzer.remove_project("demo"));
    assert_eq!(analyzer.cache().project_entry_count("demo"), 0);
    assert_eq!(analyzer.cache().project_entry_count("other"), 1);
    assert!(matches!(
        analyzer.get_symbols("demo", "a.py"),
        Err(ArborError::ProjectNotFound(_))
    ));
    assert!(!analyzer.remove_project("demo"));
}

#[test]
fn test_removal_during_parse_leaves_no_cache_entry() {
    let dir = TempDir::new().unwrap();
    let body: String = (0..60_000).map(|i| format!("v{} = {}\n", i, i)).collect();
    std::fs::write(dir.path().join("big.py"), body).unwrap();

    for _ in 0..5 {
        let analyzer = analyzer_with(Config::default(), dir.path());
        std::thread::scope(|s| {
            let parse = s.spawn(|| analyzer.parse_file("demo", "big.py", None));
            std::thread::sleep(Duration::from_millis(15));
            assert!(analyzer.remove_project("demo"));
            // Either the parse finished, or it lost the race to the lookup
            let _ = parse.join().unwrap();
        });
        assert_eq!(analyzer.cache().project_entry_count("demo"), 0);
        assert_eq!(analyzer.cache().stats().footprint_bytes, 0);

        // Registering the name again caches normally
        analyzer
            .register_project(dir.path(), Some("demo"), None)
            .unwrap();
        analyzer.parse_file("demo", "big.py", None).unwrap();
        assert_eq!(analyzer.cache().project_entry_count("demo"), 1);
    }
}

#[test]
fn test_get_ast_depth_bound() {
    let dir = create_test_project();
    let analyzer = analyzer_with(Config::default(), dir.path());

    for depth in [0, 1, 2, 3, 6] {
        let options = AstOptions {
            max_depth: Some(depth),
            ..Default::default()
        };
        let ast = analyzer.get_ast("demo", "src/lib.rs", &options).unwrap();
        assert_eq!(ast.language, "rust");
        assert_eq!(ast.max_depth, depth);
        assert!(deepest(&ast.root, 0) <= depth);
        check_truncation(&ast.root, 0, depth);
    }
}

#[test]
fn test_concurrent_requests_parse_once() {
    let dir = create_test_project();
    let body: String = (0..3000).map(|i| format!("value_{} = {}\n", i, i)).collect();
    std::fs::write(dir.path().join("big.py"), body).unwrap();
    let analyzer = Arc::new(analyzer_with(Config::default(), dir.path()));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let analyzer = Arc::clone(&analyzer);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                analyzer.get_ast("demo", "big.py", &AstOptions::default()).unwrap()
            })
        })
        .collect();
    for handle in handles {
        let ast = handle.join().unwrap();
        assert_eq!(ast.root.child_count, 3000);
    }

    let stats = analyzer.cache().stats();
    assert_eq!(stats.parses, 1);
    assert_eq!(stats.entries, 1);
}

#[test]
fn test_small_budget_keeps_only_latest_entry() {
    let dir = create_test_project();
    // Each file is roughly 0.8 MB of accounted footprint
    for name in ["one.py", "two.py"] {
        let body: String = (0..2500).map(|i| format!("v{} = {}\n", i, i)).collect();
        std::fs::write(dir.path().join(name), body).unwrap();
    }
    let mut config = Config::default();
    config.cache.max_size_mb = 1;
    let analyzer = analyzer_with(config, dir.path());

    let (_, one) = analyzer.parse_file("demo", "one.py", None).unwrap();
    let (_, two) = analyzer.parse_file("demo", "two.py", None).unwrap();
    assert!(one.footprint() + two.footprint() > 1024 * 1024);

    let cache = analyzer.cache();
    assert!(!cache.contains("demo", Path::new("one.py")));
    assert!(cache.contains("demo", Path::new("two.py")));
    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(cache.stats().footprint_bytes, two.footprint());
}

#[test]
fn test_invalid_query_leaves_cache_untouched() {
    let dir = create_test_project();
    let analyzer = analyzer_with(Config::default(), dir.path());

    let err = analyzer
        .run_query("demo", "(function_definition", Some("python"), Some("a.py"), None)
        .unwrap_err();
    match &err {
        ArborError::QueryError { message, .. } => assert!(!message.is_empty()),
        other => panic!("expected query error, got {other}"),
    }
    assert_eq!(err.code(), "query_error");

    let stats = analyzer.cache().stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.parses, 0);
    assert_eq!(stats.misses, 0);
}

#[test]
fn test_parent_escape_is_a_security_violation() {
    let dir = create_test_project();
    let analyzer = analyzer_with(Config::default(), dir.path());

    for path in ["../a.py", "src/../../outside.py", "../../etc/passwd"] {
        let err = analyzer.get_ast("demo", path, &AstOptions::default()).unwrap_err();
        assert!(
            matches!(err, ArborError::SecurityViolation { .. }),
            "{path}: {err}"
        );
        assert_eq!(err.envelope().code, "security_violation");
    }
    assert!(matches!(
        analyzer.get_file("demo", "../a.py", None, None),
        Err(ArborError::SecurityViolation { .. })
    ));
    assert_eq!(analyzer.cache().stats().parses, 0);
}

#[test]
fn test_syntax_errors_are_returned_as_data() {
    let dir = create_test_project();
    std::fs::write(dir.path().join("broken.py"), "def broken(:\n    pass\n").unwrap();
    let analyzer = analyzer_with(Config::default(), dir.path());

    let ast = analyzer
        .get_ast("demo", "broken.py", &AstOptions::default())
        .unwrap();
    assert!(ast.has_errors);
    assert_eq!(analyzer.cache().stats().entries, 1);
}

#[test]
fn test_disabled_cache_parses_every_time() {
    let dir = create_test_project();
    let mut config = Config::default();
    config.cache.enabled = false;
    let analyzer = analyzer_with(config, dir.path());

    analyzer.get_symbols("demo", "a.py").unwrap();
    analyzer.get_symbols("demo", "a.py").unwrap();
    let stats = analyzer.cache().stats();
    assert!(!stats.enabled);
    assert_eq!(stats.parses, 2);
    assert_eq!(stats.entries, 0);
}

#[test]
fn test_language_detection_failures() {
    let dir = create_test_project();
    std::fs::write(dir.path().join("notes.txt"), "plain text\n").unwrap();
    let analyzer = analyzer_with(Config::default(), dir.path());

    let err = analyzer.get_symbols("demo", "notes.txt").unwrap_err();
    assert!(matches!(err, ArborError::LanguageNotDetected(_)));
    assert_eq!(err.code(), "not_found");

    let err = analyzer
        .run_query("demo", "(x)", Some("cobol"), None, None)
        .unwrap_err();
    assert!(matches!(err, ArborError::LanguageUnavailable { .. }));
    assert!(!analyzer.check_language_available("cobol", false));
    assert!(analyzer.check_language_available("python", false));
    // A forced recheck constructs the grammar again
    assert!(!analyzer.check_language_available("cobol", true));
    assert!(analyzer.check_language_available("go", true));
    assert!(analyzer.language_registry().status().loaded.contains(&"go".to_string()));
}

#[test]
fn test_analysis_operations() {
    let dir = create_test_project();
    let analyzer = analyzer_with(Config::default(), dir.path());

    let complexity = analyzer.analyze_complexity("demo", "src/lib.rs").unwrap();
    assert_eq!(complexity.function_count, 1);
    assert_eq!(complexity.class_count, 1);
    assert_eq!(complexity.cyclomatic_complexity, 2);

    let deps = analyzer.get_dependencies("demo", "src/lib.rs").unwrap();
    assert_eq!(deps.dependencies.len(), 1);
    assert_eq!(deps.dependencies[0].module, "std::fmt");
    assert_eq!(deps.dependencies[0].kind, "use_declaration");

    let overview = analyzer.analyze_project("demo").unwrap();
    assert_eq!(overview.total_files, 2);
    assert_eq!(overview.languages.get("python"), Some(&1));
    assert_eq!(overview.languages.get("rust"), Some(&1));
}

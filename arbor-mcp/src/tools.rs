//! Tool definitions advertised through `tools/list`

use serde_json::{json, Value};

pub fn definitions() -> Value {
    json!([
        {
            "name": "register_project",
            "description": "Register a project directory for analysis. Returns the project record.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Project directory (e.g., '/path/to/repo')"
                    },
                    "name": {
                        "type": "string",
                        "description": "Project name; derived from the directory name when omitted"
                    },
                    "description": {
                        "type": "string",
                        "description": "Free-form description"
                    }
                },
                "required": ["path"]
            }
        },
        {
            "name": "list_projects",
            "description": "List registered projects ordered by name",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "remove_project",
            "description": "Remove a project and drop its cached parse trees",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Project name" }
                },
                "required": ["name"]
            }
        },
        {
            "name": "list_languages",
            "description": "List supported language identifiers",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "check_language_available",
            "description": "Check whether a grammar for the language can be loaded",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "language": { "type": "string", "description": "Language id (e.g., 'python')" },
                    "recheck": { "type": "boolean", "description": "Retry a grammar that failed to load (default: false)" }
                },
                "required": ["language"]
            }
        },
        {
            "name": "list_files",
            "description": "List project files, filtered by glob, depth and extension",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" },
                    "pattern": { "type": "string", "description": "Glob over project-relative paths (e.g., 'src/**/*.rs')" },
                    "max_depth": { "type": "integer", "description": "Maximum directory depth below the root" },
                    "extensions": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Extensions without the dot (e.g., ['py', 'rs'])"
                    }
                },
                "required": ["project"]
            }
        },
        {
            "name": "get_file",
            "description": "Read file content, optionally a window of lines",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" },
                    "path": { "type": "string", "description": "Project-relative path" },
                    "start_line": { "type": "integer", "description": "First line (1-based)" },
                    "max_lines": { "type": "integer", "description": "Maximum lines to return" }
                },
                "required": ["project", "path"]
            }
        },
        {
            "name": "get_file_metadata",
            "description": "Size, modification time, language and line count of a file",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" },
                    "path": { "type": "string", "description": "Project-relative path" }
                },
                "required": ["project", "path"]
            }
        },
        {
            "name": "get_ast",
            "description": "Depth-bounded syntax tree of a file. Nodes cut off by the depth or child limit are flagged truncated.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" },
                    "path": { "type": "string", "description": "Project-relative path" },
                    "max_depth": { "type": "integer", "description": "Depth limit; defaults to the configured depth" },
                    "max_children": { "type": "integer", "description": "Children kept per node" },
                    "include_text": { "type": "boolean", "description": "Attach truncated source text to each node" },
                    "start_line": { "type": "integer", "description": "Only nodes overlapping lines from here (1-based)" },
                    "end_line": { "type": "integer", "description": "Only nodes overlapping lines up to here (1-based)" },
                    "start_byte": { "type": "integer", "description": "Only nodes overlapping bytes from here" },
                    "end_byte": { "type": "integer", "description": "Only nodes overlapping bytes before here" },
                    "language": { "type": "string", "description": "Override language detection" }
                },
                "required": ["project", "path"]
            }
        },
        {
            "name": "get_node_at_position",
            "description": "Nodes from the root down to the smallest node at a position",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" },
                    "path": { "type": "string", "description": "Project-relative path" },
                    "row": { "type": "integer", "description": "Row (0-based)" },
                    "column": { "type": "integer", "description": "Column in bytes (0-based)" },
                    "language": { "type": "string", "description": "Override language detection" }
                },
                "required": ["project", "path", "row", "column"]
            }
        },
        {
            "name": "find_text",
            "description": "Search project files for text or a regex, with optional context lines",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" },
                    "pattern": { "type": "string", "description": "Text or regex to find" },
                    "file_pattern": { "type": "string", "description": "Glob limiting searched files" },
                    "use_regex": { "type": "boolean", "description": "Treat pattern as a regex (default: false)" },
                    "case_sensitive": { "type": "boolean", "description": "Default: true" },
                    "whole_word": { "type": "boolean", "description": "Match whole words only" },
                    "context_lines": { "type": "integer", "description": "Lines of context around each match" },
                    "max_results": { "type": "integer", "description": "Result limit" }
                },
                "required": ["project", "pattern"]
            }
        },
        {
            "name": "run_query",
            "description": "Run a tree-sitter query on one file, or on every project file of a language. Invalid queries are reported before any file is parsed.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" },
                    "query": { "type": "string", "description": "Query source (e.g., '(function_definition name: (identifier) @name)')" },
                    "language": { "type": "string", "description": "Language id; required when path is omitted" },
                    "path": { "type": "string", "description": "Single file to query" },
                    "max_results": { "type": "integer", "description": "Result limit" }
                },
                "required": ["project", "query"]
            }
        },
        {
            "name": "list_query_templates",
            "description": "List the predefined query templates of a language",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "language": { "type": "string", "description": "Language id" }
                },
                "required": ["language"]
            }
        },
        {
            "name": "get_query_template",
            "description": "Fetch one predefined query template",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "language": { "type": "string", "description": "Language id" },
                    "name": { "type": "string", "description": "Template name (e.g., 'functions')" }
                },
                "required": ["language", "name"]
            }
        },
        {
            "name": "build_query",
            "description": "Combine templates into one validated query",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "language": { "type": "string", "description": "Language id" },
                    "templates": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Template names (e.g., ['functions', 'classes'])"
                    }
                },
                "required": ["language", "templates"]
            }
        },
        {
            "name": "adapt_query",
            "description": "Rewrite node kinds in a query from one language to another",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Query source" },
                    "from_language": { "type": "string", "description": "Language the query was written for" },
                    "to_language": { "type": "string", "description": "Target language" }
                },
                "required": ["query", "from_language", "to_language"]
            }
        },
        {
            "name": "get_node_types",
            "description": "Named node kinds of a language grammar",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "language": { "type": "string", "description": "Language id" }
                },
                "required": ["language"]
            }
        },
        {
            "name": "get_symbols",
            "description": "Functions, classes and imports defined in a file",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" },
                    "path": { "type": "string", "description": "Project-relative path" }
                },
                "required": ["project", "path"]
            }
        },
        {
            "name": "find_usage",
            "description": "Identifier occurrences of a symbol across the project",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" },
                    "symbol": { "type": "string", "description": "Identifier to find" },
                    "scope": { "type": "string", "description": "Glob limiting searched files" },
                    "language": { "type": "string", "description": "Only files of this language" },
                    "max_results": { "type": "integer", "description": "Result limit" }
                },
                "required": ["project", "symbol"]
            }
        },
        {
            "name": "analyze_project",
            "description": "File counts per language, manifests and top-level layout of a project",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" }
                },
                "required": ["project"]
            }
        },
        {
            "name": "analyze_complexity",
            "description": "Cyclomatic complexity, nesting depth and size metrics of a file",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" },
                    "path": { "type": "string", "description": "Project-relative path" }
                },
                "required": ["project", "path"]
            }
        },
        {
            "name": "get_dependencies",
            "description": "Imported modules of a file",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" },
                    "path": { "type": "string", "description": "Project-relative path" }
                },
                "required": ["project", "path"]
            }
        },
        {
            "name": "find_similar_code",
            "description": "Project constructs structurally similar to a snippet, ranked by score",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name" },
                    "snippet": { "type": "string", "description": "Code to compare against" },
                    "language": { "type": "string", "description": "Language of the snippet" },
                    "threshold": { "type": "number", "description": "Minimum similarity in 0.0..=1.0 (default: 0.8)" },
                    "max_results": { "type": "integer", "description": "Result limit" }
                },
                "required": ["project", "snippet", "language"]
            }
        },
        {
            "name": "clear_cache",
            "description": "Drop cached parse trees, for one project or all",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project": { "type": "string", "description": "Project name; all projects when omitted" }
                }
            }
        },
        {
            "name": "diagnose_config",
            "description": "Effective configuration, cache statistics and grammar status",
            "inputSchema": { "type": "object", "properties": {} }
        }
    ])
}

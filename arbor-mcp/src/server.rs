//! JSON-RPC request handling and tool dispatch

use crate::tools;
use arbor_core::files::ListOptions;
use arbor_core::search::TextSearchOptions;
use arbor_core::{
    Analyzer, ArborError, AstOptions, ErrorEnvelope, FindTextOptions, Project, SpanFilter,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;

#[derive(Deserialize)]
#[allow(dead_code)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// Why a tool call did not produce a result
enum ToolFailure {
    /// Malformed call: reported as a JSON-RPC error
    Protocol(i32, String),
    /// Operation failed: reported as a tool result with `isError`
    Tool(ArborError),
}

impl From<ArborError> for ToolFailure {
    fn from(err: ArborError) -> Self {
        Self::Tool(err)
    }
}

type ToolResult = Result<Value, ToolFailure>;

pub struct McpServer {
    analyzer: Arc<Analyzer>,
}

impl McpServer {
    pub fn new(analyzer: Arc<Analyzer>) -> Self {
        Self { analyzer }
    }

    /// Handle one line of input; `None` for notifications
    pub fn handle_request(&self, line: &str) -> Option<String> {
        let req: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable request");
                return Some(
                    json!({
                        "jsonrpc": "2.0",
                        "id": null,
                        "error": { "code": PARSE_ERROR, "message": format!("Parse error: {}", e) }
                    })
                    .to_string(),
                );
            }
        };

        // Notifications carry no id and get no response
        if req.method.starts_with("notifications/") {
            tracing::debug!(method = %req.method, "notification");
            return None;
        }

        let id = req.id.clone().unwrap_or(Value::Null);
        let result = match req.method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tools::definitions() })),
            "tools/call" => self.handle_tools_call(req.params.as_ref()),
            _ => Err((METHOD_NOT_FOUND, format!("Method not found: {}", req.method))),
        };

        let response = match result {
            Ok(value) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result: Some(value),
                error: None,
            },
            Err((code, message)) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(JsonRpcError { code, message }),
            },
        };

        match serde_json::to_string(&response) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize response");
                Some(
                    json!({
                        "jsonrpc": "2.0",
                        "id": response.id,
                        "error": { "code": INTERNAL_ERROR, "message": "response serialization failed" }
                    })
                    .to_string(),
                )
            }
        }
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": "arbor-mcp",
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    fn handle_tools_call(&self, params: Option<&Value>) -> Result<Value, (i32, String)> {
        let params = params.ok_or((INVALID_PARAMS, "Missing params".to_string()))?;
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or((INVALID_PARAMS, "Missing tool name".to_string()))?;
        let empty = json!({});
        let args = params.get("arguments").unwrap_or(&empty);

        let started = std::time::Instant::now();
        let outcome = self.call_tool(name, args);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                tracing::debug!(tool = name, elapsed_ms, "tool call succeeded");
                Ok(value)
            }
            Err(ToolFailure::Tool(err)) => {
                tracing::info!(
                    tool = name,
                    elapsed_ms,
                    code = err.code(),
                    error = %err,
                    "tool call failed"
                );
                Ok(tool_error(&err.envelope()))
            }
            Err(ToolFailure::Protocol(code, message)) => Err((code, message)),
        }
    }

    fn call_tool(&self, name: &str, args: &Value) -> ToolResult {
        match name {
            "register_project" => self.tool_register_project(args),
            "list_projects" => {
                let projects = self.analyzer.list_projects();
                let projects: Vec<&Project> = projects.iter().map(|p| p.as_ref()).collect();
                text_result(&projects)
            }
            "remove_project" => self.tool_remove_project(args),
            "list_languages" => text_result(&self.analyzer.list_languages()),
            "check_language_available" => self.tool_check_language(args),
            "list_files" => self.tool_list_files(args),
            "get_file" => self.tool_get_file(args),
            "get_file_metadata" => {
                let a: FileArgs = parse_args(args)?;
                text_result(&self.analyzer.get_file_metadata(&a.project, &a.path)?)
            }
            "get_ast" => self.tool_get_ast(args),
            "get_node_at_position" => self.tool_node_at_position(args),
            "find_text" => self.tool_find_text(args),
            "run_query" => self.tool_run_query(args),
            "list_query_templates" => {
                let a: LanguageArgs = parse_args(args)?;
                text_result(&self.analyzer.list_query_templates(&a.language)?)
            }
            "get_query_template" => {
                let a: TemplateArgs = parse_args(args)?;
                text_result(self.analyzer.get_query_template(&a.language, &a.name)?)
            }
            "build_query" => {
                let a: BuildQueryArgs = parse_args(args)?;
                let query = self.analyzer.build_query(&a.language, &a.templates)?;
                text_result(&json!({ "language": a.language, "query": query }))
            }
            "adapt_query" => {
                let a: AdaptQueryArgs = parse_args(args)?;
                text_result(&self.analyzer.adapt_query(&a.query, &a.from_language, &a.to_language)?)
            }
            "get_node_types" => {
                let a: LanguageArgs = parse_args(args)?;
                text_result(&self.analyzer.get_node_types(&a.language)?)
            }
            "get_symbols" => {
                let a: FileArgs = parse_args(args)?;
                text_result(&self.analyzer.get_symbols(&a.project, &a.path)?)
            }
            "find_usage" => self.tool_find_usage(args),
            "analyze_project" => {
                let a: ProjectArgs = parse_args(args)?;
                text_result(&self.analyzer.analyze_project(&a.project)?)
            }
            "analyze_complexity" => {
                let a: FileArgs = parse_args(args)?;
                text_result(&self.analyzer.analyze_complexity(&a.project, &a.path)?)
            }
            "get_dependencies" => {
                let a: FileArgs = parse_args(args)?;
                text_result(&self.analyzer.get_dependencies(&a.project, &a.path)?)
            }
            "find_similar_code" => self.tool_find_similar(args),
            "clear_cache" => {
                let a: ClearCacheArgs = parse_args(args)?;
                let evicted = self.analyzer.clear_cache(a.project.as_deref())?;
                text_result(&json!({ "evicted": evicted }))
            }
            "diagnose_config" => text_result(&self.analyzer.diagnose_config()),
            _ => Err(ToolFailure::Protocol(
                INVALID_PARAMS,
                format!("Unknown tool: {}", name),
            )),
        }
    }

    fn tool_register_project(&self, args: &Value) -> ToolResult {
        let a: RegisterProjectArgs = parse_args(args)?;
        let project = self.analyzer.register_project(
            Path::new(&a.path),
            a.name.as_deref(),
            a.description.as_deref(),
        )?;
        text_result(&*project)
    }

    fn tool_remove_project(&self, args: &Value) -> ToolResult {
        let a: NameArgs = parse_args(args)?;
        let removed = self.analyzer.remove_project(&a.name);
        text_result(&json!({ "name": a.name, "removed": removed }))
    }

    fn tool_check_language(&self, args: &Value) -> ToolResult {
        let a: CheckLanguageArgs = parse_args(args)?;
        let available = self
            .analyzer
            .check_language_available(&a.language, a.recheck);
        text_result(&json!({ "language": a.language, "available": available }))
    }

    fn tool_list_files(&self, args: &Value) -> ToolResult {
        let a: ListFilesArgs = parse_args(args)?;
        let options = ListOptions {
            pattern: a.pattern,
            max_depth: a.max_depth,
            extensions: a.extensions,
        };
        text_result(&self.analyzer.list_files(&a.project, &options)?)
    }

    fn tool_get_file(&self, args: &Value) -> ToolResult {
        let a: GetFileArgs = parse_args(args)?;
        text_result(
            &self
                .analyzer
                .get_file(&a.project, &a.path, a.start_line, a.max_lines)?,
        )
    }

    fn tool_get_ast(&self, args: &Value) -> ToolResult {
        let a: GetAstArgs = parse_args(args)?;
        let range = match (a.start_line, a.end_line, a.start_byte, a.end_byte) {
            (None, None, None, None) => None,
            (start, end, None, None) => Some(SpanFilter::Lines {
                start: start.unwrap_or(1),
                end: end.unwrap_or(usize::MAX),
            }),
            (None, None, start, end) => Some(SpanFilter::Bytes {
                start: start.unwrap_or(0),
                end: end.unwrap_or(usize::MAX),
            }),
            _ => {
                return Err(ToolFailure::Protocol(
                    INVALID_PARAMS,
                    "Use either a line range or a byte range, not both".to_string(),
                ))
            }
        };
        let options = AstOptions {
            max_depth: a.max_depth,
            max_children: a.max_children,
            include_text: a.include_text,
            range,
            language: a.language,
        };
        text_result(&self.analyzer.get_ast(&a.project, &a.path, &options)?)
    }

    fn tool_node_at_position(&self, args: &Value) -> ToolResult {
        let a: PositionArgs = parse_args(args)?;
        text_result(&self.analyzer.get_node_at_position(
            &a.project,
            &a.path,
            a.row,
            a.column,
            a.language.as_deref(),
        )?)
    }

    fn tool_find_text(&self, args: &Value) -> ToolResult {
        let a: FindTextArgs = parse_args(args)?;
        let options = FindTextOptions {
            search: TextSearchOptions {
                pattern: a.pattern,
                use_regex: a.use_regex,
                case_sensitive: a.case_sensitive,
                whole_word: a.whole_word,
                context_lines: a.context_lines,
            },
            file_pattern: a.file_pattern,
            max_results: a.max_results,
        };
        text_result(&self.analyzer.find_text(&a.project, &options)?)
    }

    fn tool_run_query(&self, args: &Value) -> ToolResult {
        let a: RunQueryArgs = parse_args(args)?;
        text_result(&self.analyzer.run_query(
            &a.project,
            &a.query,
            a.language.as_deref(),
            a.path.as_deref(),
            a.max_results,
        )?)
    }

    fn tool_find_usage(&self, args: &Value) -> ToolResult {
        let a: FindUsageArgs = parse_args(args)?;
        text_result(&self.analyzer.find_usage(
            &a.project,
            &a.symbol,
            a.scope.as_deref(),
            a.language.as_deref(),
            a.max_results,
        )?)
    }

    fn tool_find_similar(&self, args: &Value) -> ToolResult {
        let a: SimilarArgs = parse_args(args)?;
        text_result(&self.analyzer.find_similar_code(
            &a.project,
            &a.snippet,
            &a.language,
            a.threshold,
            a.max_results,
        )?)
    }
}

fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, ToolFailure> {
    serde_json::from_value(args.clone())
        .map_err(|e| ToolFailure::Protocol(INVALID_PARAMS, format!("Invalid arguments: {}", e)))
}

fn text_result<T: Serialize + ?Sized>(value: &T) -> ToolResult {
    let text = serde_json::to_string_pretty(value).map_err(ArborError::from)?;
    Ok(json!({
        "content": [{
            "type": "text",
            "text": text
        }]
    }))
}

fn tool_error(envelope: &ErrorEnvelope) -> Value {
    let text = serde_json::to_string_pretty(envelope)
        .unwrap_or_else(|_| envelope.message.clone());
    json!({
        "content": [{
            "type": "text",
            "text": text
        }],
        "isError": true
    })
}

// Tool arguments

#[derive(Deserialize)]
struct RegisterProjectArgs {
    path: String,
    name: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct NameArgs {
    name: String,
}

#[derive(Deserialize)]
struct ProjectArgs {
    project: String,
}

#[derive(Deserialize)]
struct LanguageArgs {
    language: String,
}

#[derive(Deserialize)]
struct CheckLanguageArgs {
    language: String,
    #[serde(default)]
    recheck: bool,
}

#[derive(Deserialize)]
struct FileArgs {
    project: String,
    path: String,
}

#[derive(Deserialize)]
struct ListFilesArgs {
    project: String,
    pattern: Option<String>,
    max_depth: Option<usize>,
    extensions: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct GetFileArgs {
    project: String,
    path: String,
    start_line: Option<usize>,
    max_lines: Option<usize>,
}

#[derive(Deserialize)]
struct GetAstArgs {
    project: String,
    path: String,
    max_depth: Option<usize>,
    max_children: Option<usize>,
    #[serde(default)]
    include_text: bool,
    start_line: Option<usize>,
    end_line: Option<usize>,
    start_byte: Option<usize>,
    end_byte: Option<usize>,
    language: Option<String>,
}

#[derive(Deserialize)]
struct PositionArgs {
    project: String,
    path: String,
    row: usize,
    column: usize,
    language: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct FindTextArgs {
    project: String,
    pattern: String,
    file_pattern: Option<String>,
    #[serde(default)]
    use_regex: bool,
    #[serde(default = "default_true")]
    case_sensitive: bool,
    #[serde(default)]
    whole_word: bool,
    #[serde(default)]
    context_lines: usize,
    max_results: Option<usize>,
}

#[derive(Deserialize)]
struct RunQueryArgs {
    project: String,
    query: String,
    language: Option<String>,
    path: Option<String>,
    max_results: Option<usize>,
}

#[derive(Deserialize)]
struct TemplateArgs {
    language: String,
    name: String,
}

#[derive(Deserialize)]
struct BuildQueryArgs {
    language: String,
    templates: Vec<String>,
}

#[derive(Deserialize)]
struct AdaptQueryArgs {
    query: String,
    from_language: String,
    to_language: String,
}

#[derive(Deserialize)]
struct FindUsageArgs {
    project: String,
    symbol: String,
    scope: Option<String>,
    language: Option<String>,
    max_results: Option<usize>,
}

fn default_threshold() -> f64 {
    0.8
}

#[derive(Deserialize)]
struct SimilarArgs {
    project: String,
    snippet: String,
    language: String,
    #[serde(default = "default_threshold")]
    threshold: f64,
    max_results: Option<usize>,
}

#[derive(Deserialize)]
struct ClearCacheArgs {
    project: Option<String>,
}

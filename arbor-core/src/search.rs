//! Plain-text search across project files

use crate::error::ArborError;
use crate::files::FileAccessor;
use crate::projects::Project;
use crate::syntax::truncate_text;
use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

/// Characters kept per matched or context line
const MAX_LINE_CHARS: usize = 300;

/// Bytes inspected when sniffing for binary content
const BINARY_SNIFF_BYTES: usize = 8192;

#[derive(Debug, Clone)]
pub struct TextSearchOptions {
    pub pattern: String,
    pub use_regex: bool,
    pub case_sensitive: bool,
    pub whole_word: bool,
    pub context_lines: usize,
}

impl TextSearchOptions {
    pub fn literal(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            use_regex: false,
            case_sensitive: true,
            whole_word: false,
            context_lines: 0,
        }
    }
}

/// A compiled text search
#[derive(Debug, Clone)]
pub struct TextSearch {
    regex: Regex,
    context_lines: usize,
}

impl TextSearch {
    pub fn new(options: &TextSearchOptions) -> crate::Result<Self> {
        if options.pattern.is_empty() {
            return Err(ArborError::InvalidPattern("empty search pattern".to_string()));
        }
        let body = if options.use_regex {
            options.pattern.clone()
        } else {
            regex::escape(&options.pattern)
        };
        let body = if options.whole_word {
            format!(r"\b(?:{})\b", body)
        } else {
            body
        };
        let regex = RegexBuilder::new(&body)
            .case_insensitive(!options.case_sensitive)
            .build()
            .map_err(|e| ArborError::InvalidPattern(e.to_string()))?;
        Ok(Self {
            regex,
            context_lines: options.context_lines,
        })
    }

    /// Matches in one file's text, one per matching line
    pub fn search_text(&self, path: &str, text: &str) -> Vec<TextMatch> {
        let lines: Vec<&str> = text.lines().collect();
        let mut out = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            let Some(found) = self.regex.find(line) else {
                continue;
            };
            let before = index.saturating_sub(self.context_lines);
            let after = (index + 1 + self.context_lines).min(lines.len());
            out.push(TextMatch {
                path: path.to_string(),
                line: index + 1,
                column: line[..found.start()].chars().count() + 1,
                text: clip(line),
                context_before: lines[before..index].iter().map(|l| clip(l)).collect(),
                context_after: lines[index + 1..after].iter().map(|l| clip(l)).collect(),
            });
        }
        out
    }
}

fn clip(line: &str) -> String {
    truncate_text(line, MAX_LINE_CHARS).0
}

#[derive(Debug, Clone, Serialize)]
pub struct TextMatch {
    pub path: String,
    /// 1-based
    pub line: usize,
    /// 1-based, in characters
    pub column: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_before: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_after: Vec<String>,
}

/// Search `paths` in parallel. Files that fail the security checks or look
/// binary are skipped. Results are ordered by path then line.
pub fn search_files(
    files: &FileAccessor,
    project: &Project,
    paths: &[String],
    search: &TextSearch,
    max_results: usize,
) -> Vec<TextMatch> {
    let mut matches: Vec<TextMatch> = paths
        .par_iter()
        .flat_map_iter(|path| {
            let bytes = match files
                .resolve(project, path)
                .and_then(|file| files.read_bytes(&file))
            {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::debug!(
                        project = %project.name,
                        path = %path,
                        error = %err,
                        "skipping file in text search"
                    );
                    return Vec::new();
                }
            };
            let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
            if sniff.contains(&0) {
                return Vec::new();
            }
            search.search_text(path, &String::from_utf8_lossy(&bytes))
        })
        .collect();

    matches.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
    matches.truncate(max_results);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::files::SecurityPolicy;
    use crate::projects::ProjectRegistry;
    use tempfile::TempDir;

    #[test]
    fn test_literal_is_escaped() {
        let search = TextSearch::new(&TextSearchOptions::literal("a.b(")).unwrap();
        assert_eq!(search.search_text("f", "axb(\na.b(c)\n").len(), 1);
    }

    #[test]
    fn test_case_and_whole_word() {
        let options = TextSearchOptions {
            case_sensitive: false,
            whole_word: true,
            ..TextSearchOptions::literal("cache")
        };
        let search = TextSearch::new(&options).unwrap();
        let found = search.search_text("f", "Cache here\ncached there\nthe CACHE\n");
        let lines: Vec<usize> = found.iter().map(|m| m.line).collect();
        assert_eq!(lines, vec![1, 3]);
        assert_eq!(found[1].column, 5);
    }

    #[test]
    fn test_regex_and_context() {
        let options = TextSearchOptions {
            use_regex: true,
            context_lines: 1,
            ..TextSearchOptions::literal(r"fn \w+\(")
        };
        let search = TextSearch::new(&options).unwrap();
        let found = search.search_text("lib.rs", "// top\nfn main() {\n}\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].context_before, vec!["// top"]);
        assert_eq!(found[0].context_after, vec!["}"]);
    }

    #[test]
    fn test_invalid_regex() {
        let options = TextSearchOptions {
            use_regex: true,
            ..TextSearchOptions::literal("(unclosed")
        };
        assert!(matches!(
            TextSearch::new(&options),
            Err(ArborError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_search_files_orders_and_limits() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.py"), "todo = 1\ntodo = 2\n").unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 0  # todo\n").unwrap();
        std::fs::write(dir.path().join("bin.dat"), b"todo\0\0").unwrap();
        let project = ProjectRegistry::new()
            .register(dir.path(), Some("s"), None)
            .unwrap();
        let files = FileAccessor::new(SecurityPolicy::from_config(&Config::default()));
        let paths = vec!["b.py".to_string(), "a.py".to_string(), "bin.dat".to_string()];
        let search = TextSearch::new(&TextSearchOptions::literal("todo")).unwrap();

        let all = search_files(&files, &project, &paths, &search, 10);
        let found: Vec<(&str, usize)> = all.iter().map(|m| (m.path.as_str(), m.line)).collect();
        assert_eq!(found, vec![("a.py", 1), ("b.py", 1), ("b.py", 2)]);

        assert_eq!(search_files(&files, &project, &paths, &search, 2).len(), 2);
    }
}

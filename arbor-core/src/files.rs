//! File access scoped to a project root
//!
//! Every path is checked lexically against the project root before the
//! filesystem is touched, then again after symlink resolution.

use crate::config::Config;
use crate::error::ArborError;
use crate::languages::language_for_path;
use crate::projects::Project;
use ignore::WalkBuilder;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Security limits applied to every file access
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub max_file_bytes: u64,
    pub excluded_dirs: Vec<String>,
    /// Lowercase extensions without dot; `None` allows all
    pub allowed_extensions: Option<Vec<String>>,
}

impl SecurityPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_file_bytes: config.max_file_bytes(),
            excluded_dirs: config.security.excluded_dirs.clone(),
            allowed_extensions: config.security.allowed_extensions.as_ref().map(|exts| {
                exts.iter()
                    .map(|e| e.trim_start_matches('.').to_lowercase())
                    .collect()
            }),
        }
    }

    fn is_excluded(&self, relative: &Path) -> bool {
        relative.components().any(|c| match c {
            Component::Normal(name) => self
                .excluded_dirs
                .iter()
                .any(|dir| name.to_str() == Some(dir.as_str())),
            _ => false,
        })
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        match &self.allowed_extensions {
            None => true,
            Some(allowed) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
                .unwrap_or(false),
        }
    }
}

/// A path that passed every boundary check
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub project: String,
    /// Root-relative path
    pub relative: PathBuf,
    pub absolute: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl ResolvedFile {
    /// Root-relative path with forward slashes
    pub fn display_path(&self) -> String {
        slash_path(&self.relative)
    }
}

/// File content with its line window
#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub path: String,
    /// 1-based first line returned
    pub start_line: usize,
    /// 1-based last line returned (0 when empty)
    pub end_line: usize,
    pub total_lines: usize,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    pub path: String,
    pub size: u64,
    /// Seconds since the unix epoch
    pub modified: Option<u64>,
    pub language: Option<String>,
    pub extension: Option<String>,
    pub line_count: usize,
}

/// Options for `list_files`
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Glob matched against the root-relative path
    pub pattern: Option<String>,
    pub max_depth: Option<usize>,
    /// Extensions without dot
    pub extensions: Option<Vec<String>>,
}

/// Stateless accessor enforcing a [`SecurityPolicy`]
#[derive(Debug, Clone)]
pub struct FileAccessor {
    policy: SecurityPolicy,
}

impl FileAccessor {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Resolve a project-relative path, enforcing every boundary check
    pub fn resolve(&self, project: &Project, path: &str) -> crate::Result<ResolvedFile> {
        let requested = Path::new(path);
        let violation = |reason: &str| ArborError::SecurityViolation {
            path: requested.to_path_buf(),
            reason: reason.to_string(),
        };

        // Lexical containment before any filesystem access
        let joined = normalize(&project.root.join(requested));
        let relative = joined
            .strip_prefix(&project.root)
            .map_err(|_| violation("path escapes project root"))?
            .to_path_buf();
        if relative.as_os_str().is_empty() {
            return Err(ArborError::InvalidPath {
                path: requested.to_path_buf(),
                reason: "path is the project root".to_string(),
            });
        }
        if self.policy.is_excluded(&relative) {
            return Err(violation("path is inside an excluded directory"));
        }
        if !self.policy.extension_allowed(&relative) {
            return Err(violation("file extension is not allowed"));
        }

        if !joined.exists() {
            return Err(ArborError::FileNotFound(relative));
        }
        let absolute = joined.canonicalize()?;
        if !absolute.starts_with(&project.root) {
            return Err(violation("path resolves outside project root"));
        }
        let metadata = std::fs::metadata(&absolute)?;
        if !metadata.is_file() {
            return Err(ArborError::InvalidPath {
                path: requested.to_path_buf(),
                reason: "not a regular file".to_string(),
            });
        }
        if metadata.len() > self.policy.max_file_bytes {
            return Err(violation(&format!(
                "file is {} bytes, limit is {}",
                metadata.len(),
                self.policy.max_file_bytes
            )));
        }

        Ok(ResolvedFile {
            project: project.name.clone(),
            relative,
            absolute,
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }

    /// Read the bytes of a resolved file (size limit re-checked on the read)
    pub fn read_bytes(&self, file: &ResolvedFile) -> crate::Result<Vec<u8>> {
        let bytes = std::fs::read(&file.absolute)?;
        if bytes.len() as u64 > self.policy.max_file_bytes {
            return Err(ArborError::SecurityViolation {
                path: file.relative.clone(),
                reason: "file grew past the size limit".to_string(),
            });
        }
        Ok(bytes)
    }

    /// Read text, optionally windowed by a 1-based start line and line count
    pub fn read_text(
        &self,
        project: &Project,
        path: &str,
        start_line: Option<usize>,
        max_lines: Option<usize>,
    ) -> crate::Result<FileContent> {
        let file = self.resolve(project, path)?;
        let bytes = self.read_bytes(&file)?;
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        let total_lines = lines.len();

        let start = start_line.unwrap_or(1).max(1);
        let skip = (start - 1).min(total_lines);
        let take = max_lines.unwrap_or(usize::MAX);
        let window: Vec<&str> = lines.iter().skip(skip).take(take).copied().collect();
        let end_line = if window.is_empty() {
            0
        } else {
            skip + window.len()
        };

        let content = if start_line.is_none() && max_lines.is_none() {
            text.to_string()
        } else {
            window.join("\n")
        };

        Ok(FileContent {
            path: file.display_path(),
            start_line: skip + 1,
            end_line,
            total_lines,
            content,
        })
    }

    pub fn metadata(&self, project: &Project, path: &str) -> crate::Result<FileMetadata> {
        let file = self.resolve(project, path)?;
        let bytes = self.read_bytes(&file)?;
        let line_count = String::from_utf8_lossy(&bytes).lines().count();
        Ok(FileMetadata {
            path: file.display_path(),
            size: file.size,
            modified: file
                .modified
                .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
            language: language_for_path(&file.relative).map(String::from),
            extension: file
                .relative
                .extension()
                .map(|e| e.to_string_lossy().into_owned()),
            line_count,
        })
    }

    /// Walk the project, respecting .gitignore and the security policy.
    /// Returns sorted root-relative paths.
    pub fn list_files(
        &self,
        project: &Project,
        options: &ListOptions,
    ) -> crate::Result<Vec<String>> {
        let glob = match &options.pattern {
            Some(pattern) => Some(
                globset::Glob::new(pattern)
                    .map_err(|e| ArborError::InvalidPattern(e.to_string()))?
                    .compile_matcher(),
            ),
            None => None,
        };

        let excluded = self.policy.excluded_dirs.clone();
        let mut builder = WalkBuilder::new(&project.root);
        builder
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .require_git(false)
            .max_depth(options.max_depth)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir && excluded.iter().any(|d| entry.file_name().to_str() == Some(d.as_str())))
            });

        let mut files = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&project.root).unwrap_or(path);

            if self.policy.is_excluded(relative) || !self.policy.extension_allowed(relative) {
                continue;
            }
            if let Some(exts) = &options.extensions {
                let ext = relative.extension().and_then(|e| e.to_str()).unwrap_or("");
                if !exts
                    .iter()
                    .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
                {
                    continue;
                }
            }
            if let Some(glob) = &glob {
                if !glob.is_match(relative) {
                    continue;
                }
            }
            files.push(slash_path(relative));
        }

        files.sort();
        Ok(files)
    }

    /// Project files whose extension maps to `language`
    pub fn files_for_language(
        &self,
        project: &Project,
        language: &str,
    ) -> crate::Result<Vec<String>> {
        let options = ListOptions::default();
        Ok(self
            .list_files(project, &options)?
            .into_iter()
            .filter(|p| language_for_path(Path::new(p)) == Some(language))
            .collect())
    }
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub(crate) fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

//! Arbor Core - Structural code analysis over cached syntax trees
//!
//! This library provides project and language registries, scoped file
//! access, a shared parse tree cache, and bounded AST, query and analysis
//! operations exposed through the [`Analyzer`] facade.

pub mod analysis;
pub mod analyzer;
pub mod cache;
pub mod config;
pub mod error;
pub mod files;
pub mod languages;
pub mod projects;
pub mod query;
pub mod search;
pub mod syntax;
pub mod traverse;

pub use analyzer::{Analyzer, AstOptions, AstResult, Diagnostics, FindTextOptions, NodePath};
pub use cache::{CacheSettings, CacheStats, ParsedTree, TreeCache};
pub use config::Config;
pub use error::{ArborError, ErrorEnvelope};
pub use files::{FileContent, FileMetadata, ListOptions};
pub use languages::{LanguageHandle, LanguageRegistry};
pub use projects::{Project, ProjectRegistry};
pub use query::{QueryMatch, QueryTemplate, Symbol, SymbolSet};
pub use search::{TextMatch, TextSearchOptions};
pub use syntax::Span;
pub use traverse::{BoundedNode, SpanFilter};

/// Result type alias for arbor operations
pub type Result<T> = std::result::Result<T, ArborError>;

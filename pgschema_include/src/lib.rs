//! # pgschema include resolution
//!
//! Expands psql-style `\i <path>` directives across a tree of SQL files into one
//! schema document that the planner can consume.
//!
//! ## Guarantees
//!
//! - **Sandboxed**: every target is interpreted relative to the sandbox root and
//!   must canonicalize to a regular file strictly inside it. `..` segments and
//!   absolute targets are refused before the filesystem is touched.
//! - **Cycle free**: a file that is still being expanded cannot be included again.
//!   The same file may appear in two sibling branches.
//! - **In place**: a directive is replaced by the expansion of its target, so
//!   literal SQL keeps its position relative to the includes around it.
//! - **Fail fast**: the first error ends the run and carries the chain of
//!   directives that led to it. No partial output is returned.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgschema_include::{Resolver, ResolverConfig};
//! use std::path::Path;
//!
//! let resolver = Resolver::new(ResolverConfig::default());
//! let document = resolver
//!     .resolve(Path::new("schema/main.sql"), Path::new("schema"))
//!     .await?;
//! println!("{}", document.to_sql());
//! ```
//!
//! ## Modules
//!
//! - **`path_security`**: sandbox validation of include targets.
//! - **`scanner`**: line-based directive detection.
//! - **`resolver`**: depth-first expansion with cycle and depth checks.
//! - **`document`**: the resolved tree, provenance and assembly.
//! - **`error`**: error taxonomy and include breadcrumbs.

pub mod config;
pub mod document;
pub mod error;
pub mod path_security;
pub mod resolver;
pub mod scanner;
pub mod source;
pub mod stack;
pub mod utils;

pub use config::ResolverConfig;
pub use document::{ResolvedDocument, assemble};
pub use error::{Breadcrumb, IncludeError, IncludeErrorKind};
pub use path_security::{SandboxRoot, validate_include};
pub use resolver::{Resolver, default_sandbox_root, resolve_file};
pub use source::SourceCache;

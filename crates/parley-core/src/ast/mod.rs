//! Analyzed syntax tree consumed by the compiler
//!
//! The analyzer hands over a tree in which every expression already carries
//! its inferred [`Type`] and every node its source [`Location`]. Scoping is
//! explicit (blocks, function literals), so the compiler only has to map each
//! resolved name onto storage. All nodes are serde-serialisable so that a
//! compilation unit can be shipped between processes as JSON.

mod expr;
mod pattern;
mod stmt;
mod types;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use expr::*;
pub use pattern::*;
pub use stmt::*;
pub use types::*;

/// A position in a source file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// 1-based line number (0 for synthesized nodes)
    pub line: u32,
    /// 1-based column number
    #[serde(default)]
    pub column: u32,
}

impl Location {
    /// Create a new location
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Location used for nodes the compiler synthesizes itself
    #[must_use]
    pub const fn synthesized() -> Self {
        Self { line: 0, column: 0 }
    }

    /// Location at the start of a line
    #[must_use]
    pub const fn line(line: u32) -> Self {
        Self { line, column: 1 }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// One analyzed source file of a compilation unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path the file was loaded from, used for chunk names and diagnostics
    pub path: String,
    /// Top-level statements in source order
    pub stmts: Vec<Stmt>,
}

impl SourceFile {
    /// Create a new source file
    #[must_use]
    pub fn new(path: impl Into<String>, stmts: Vec<Stmt>) -> Self {
        Self {
            path: path.into(),
            stmts,
        }
    }
}

/// A braced sequence of statements that opens a lexical scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The statements in the block
    pub stmts: Vec<Stmt>,
}

impl Block {
    /// Create a new block
    #[must_use]
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }
}

impl From<Vec<Stmt>> for Block {
    fn from(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }
}

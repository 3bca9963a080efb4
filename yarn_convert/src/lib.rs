//! yarn_convert: compiled Yarn programs to linked dialogue databases.
//!
//! The pipeline runs in four passes over one project:
//! - classify each node's flat instruction stream into basic statements,
//! - rebuild the nested blocks (if chains, shortcut option lists) the
//!   compiler flattened,
//! - create dialogue entries for every statement and link them into a graph
//!   with prioritized fallbacks,
//! - cull placeholder entries nothing can reach.
//!
//! Conditions, variable stores and commands are emitted as Lua for the
//! dialogue runtime. See [`converter::YarnConverter`] for the entry point.

mod classify;
pub mod bytecode;
pub mod config;
pub mod converter;
pub mod localization;
pub mod lua;
pub mod operators;
pub mod project;
pub mod sources;
pub mod statement;
pub mod symbols;

pub use config::{ConverterConfig, load_config};
pub use converter::{YarnConverter, convert_project, cull_unreachable_entries};
pub use project::{ConversationNode, NodeMetadata, YarnProject};
pub use sources::SourceError;

use thiserror::Error;
use yarn_data::{DbId, Opcode};

/// Fatal conversion errors. Each one means the bytecode broke a structural
/// assumption or referenced something that does not exist.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("node '{node}': expected {expected} at instruction {index}, found {found:?}")]
    UnexpectedInstruction {
        node: String,
        index: usize,
        expected: &'static str,
        found: Opcode,
    },
    #[error("node '{node}': {opcode:?} at instruction {index} is missing operand {operand}")]
    MissingOperand {
        node: String,
        index: usize,
        opcode: Opcode,
        operand: usize,
    },
    #[error("node '{node}': no statement at instruction {index}")]
    MissingStatement { node: String, index: usize },
    #[error("node '{node}': label '{label}' is not in the jump table")]
    MissingLabel { node: String, label: String },
    #[error("node '{node}': {open} block(s) left open")]
    UnbalancedBlocks { node: String, open: usize },
    #[error("node '{node}': if block ending at '{exit_label}' continues after its else clause")]
    ElseNotLast { node: String, exit_label: String },
    #[error("node '{node}': option list exits at '{found}', expected '{expected}'")]
    ExitLabelMismatch {
        node: String,
        expected: String,
        found: String,
    },
    #[error("node '{node}': shortcut option destination '{label}' is never reached")]
    MissingShortcutDestination { node: String, label: String },
    #[error("node '{node}': '{target}' is not a node of the program")]
    UnknownNode { node: String, target: String },
    #[error("node '{node}': {opcode:?} statement has no string operand")]
    MissingStatementOperand { node: String, opcode: Opcode },
    #[error("conversation {id} is not in the database")]
    MissingConversation { id: DbId },
    #[error("no string table entry for line '{key}'")]
    MissingString { key: String },
    #[error("variable '{name}' does not start with '$'")]
    InvalidVariableName { name: String },
    #[error("{opcode:?} in an expression has no usable operand")]
    MalformedExpression { opcode: Opcode },
    #[error("invalid {field} pattern: {source}")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}

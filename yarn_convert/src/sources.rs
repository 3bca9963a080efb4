//! Loaders for the converter's inputs: compiled programs, string tables and
//! the node headers of Yarn source files.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;
use yarn_data::{Program, StringInfo, StringTable};

use crate::bytecode::decode_program;
use crate::project::NodeMetadata;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("reading '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing CSV '{}': {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("decoding compiled program '{}': {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: prost::DecodeError,
    },
    #[error("parsing JSON '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("parsing RON '{}': {source}", path.display())]
    Ron {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
    #[error("unsupported program file '{}': expected .yarnc, .json or .ron", path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("string key '{key}' appears in both '{first}' and '{second}'")]
    DuplicateStringKey {
        key: String,
        first: String,
        second: String,
    },
    #[error("node '{node}' is defined by more than one program")]
    DuplicateNode { node: String },
    #[error("node '{node}': unknown opcode {code} at instruction {index}")]
    UnknownOpcode { node: String, index: usize, code: i32 },
    #[error("node '{node}': label '{label}' points at invalid index {index}")]
    InvalidLabel { node: String, label: String, index: i32 },
}

/// One row of a Yarn string table CSV (`id,text,file,node,lineNumber`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StringRow {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub node: String,
    #[serde(default, rename = "lineNumber")]
    pub line_number: Option<u32>,
}

/// Read the rows of one string table CSV. The header row names the columns.
pub fn read_string_rows<R: Read>(reader: R, path: &Path) -> Result<Vec<StringRow>, SourceError> {
    csv::Reader::from_reader(reader)
        .deserialize()
        .collect::<Result<Vec<StringRow>, _>>()
        .map_err(|source| SourceError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

/// Add rows to a string table. A key seen before is fatal.
pub fn merge_string_rows(table: &mut StringTable, rows: Vec<StringRow>, origin: &str) -> Result<(), SourceError> {
    for row in rows {
        if let Some(existing) = table.get(&row.id) {
            return Err(SourceError::DuplicateStringKey {
                key: row.id,
                first: existing.file.clone(),
                second: origin.to_string(),
            });
        }
        let file = if row.file.is_empty() { origin.to_string() } else { row.file };
        table.insert(
            row.id,
            StringInfo {
                text: row.text,
                node: row.node,
                line_number: row.line_number.unwrap_or_default(),
                file,
            },
        );
    }
    Ok(())
}

/// Load and merge several string table CSV files.
///
/// # Errors
/// Fails on unreadable files, malformed CSV and keys defined twice.
pub fn load_string_tables(paths: &[PathBuf]) -> Result<StringTable, SourceError> {
    let mut table = StringTable::new();
    for path in paths {
        let file = fs::File::open(path).map_err(|source| SourceError::Io {
            path: path.clone(),
            source,
        })?;
        let rows = read_string_rows(file, path)?;
        debug!("{} string(s) in '{}'", rows.len(), path.display());
        merge_string_rows(&mut table, rows, &path.display().to_string())?;
    }
    info!("{} string(s) loaded from {} table(s)", table.len(), paths.len());
    Ok(table)
}

/// Header fields of every node in Yarn source text, keyed by title.
///
/// A node's header is the `key: value` lines before its `---` line; the body
/// runs to the next `===`. Nodes without a `title` are skipped.
pub fn parse_node_metadata(text: &str) -> BTreeMap<String, NodeMetadata> {
    let mut nodes = BTreeMap::new();
    let mut header = NodeMetadata::new();
    let mut in_body = false;

    for line in text.lines() {
        let line = line.trim();
        if in_body {
            if line == "===" {
                in_body = false;
            }
            continue;
        }
        if line == "---" {
            in_body = true;
            match header.get("title").cloned() {
                Some(title) => {
                    nodes.insert(title, std::mem::take(&mut header));
                },
                None => {
                    warn!("skipping a node header without a title");
                    header.clear();
                },
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            header.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    nodes
}

/// Load node headers from several Yarn source files.
///
/// # Errors
/// Fails when a file cannot be read.
pub fn load_node_metadata(paths: &[PathBuf]) -> Result<BTreeMap<String, NodeMetadata>, SourceError> {
    let mut nodes = BTreeMap::new();
    for path in paths {
        let text = read_text(path)?;
        nodes.extend(parse_node_metadata(&text));
    }
    Ok(nodes)
}

/// Load one program, choosing the decoder by file extension.
///
/// # Errors
/// Fails on unreadable or undecodable files and unknown extensions.
pub fn load_program(path: &Path) -> Result<Program, SourceError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("yarnc") => {
            let bytes = fs::read(path).map_err(|source| SourceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            decode_program(&bytes, path)
        },
        Some("json") => serde_json::from_str(&read_text(path)?).map_err(|source| SourceError::Json {
            path: path.to_path_buf(),
            source,
        }),
        Some("ron") => ron::from_str(&read_text(path)?).map_err(|source| SourceError::Ron {
            path: path.to_path_buf(),
            source,
        }),
        _ => Err(SourceError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Load several programs and merge their nodes.
///
/// # Errors
/// Fails when any program fails to load or a node name repeats.
pub fn load_programs(paths: &[PathBuf]) -> Result<Program, SourceError> {
    let mut merged = Program::default();
    for path in paths {
        let program = load_program(path)?;
        if merged.name.is_empty() {
            merged.name = program.name;
        }
        for (name, node) in program.nodes {
            if merged.nodes.contains_key(&name) {
                return Err(SourceError::DuplicateNode { node: name });
            }
            merged.nodes.insert(name, node);
        }
    }
    info!("{} node(s) loaded from {} program(s)", merged.nodes.len(), paths.len());
    Ok(merged)
}

fn read_text(path: &Path) -> Result<String, SourceError> {
    fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SALLY_CSV: &str = "id,text,file,node,lineNumber
line:794945,\"Player: Hey, Sally.\",Sally,Sally,7
line:2dc39b,Sally: Oh! Hi.,Sally,Sally,8
";

    #[test]
    fn string_rows_parse_by_header() {
        let rows = read_string_rows(SALLY_CSV.as_bytes(), Path::new("Sally.csv")).expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "line:794945");
        assert_eq!(rows[0].text, "Player: Hey, Sally.");
        assert_eq!(rows[1].line_number, Some(8));
    }

    #[test]
    fn duplicate_keys_are_fatal() {
        let mut table = StringTable::new();
        let rows = read_string_rows(SALLY_CSV.as_bytes(), Path::new("a.csv")).expect("rows");
        merge_string_rows(&mut table, rows.clone(), "a.csv").expect("first merge");
        assert_eq!(table["line:2dc39b"].node, "Sally");
        let err = merge_string_rows(&mut table, rows, "b.csv").expect_err("duplicate");
        assert!(matches!(err, SourceError::DuplicateStringKey { key, .. } if key == "line:794945"));
    }

    #[test]
    fn node_headers_are_keyed_by_title() {
        let source = "title: Sally
tags:
actor: Sally
colorID: 0
---
Sally: Oh! Hi.
speaker: not a header
===
title: Shop
---
===
tags: orphan
---
===
";
        let nodes = parse_node_metadata(source);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes["Sally"].get("actor").map(String::as_str), Some("Sally"));
        assert_eq!(nodes["Sally"].get("tags").map(String::as_str), Some(""));
        assert!(!nodes["Sally"].contains_key("speaker"));
        assert_eq!(nodes["Shop"].len(), 1);
    }

    #[test]
    fn unknown_program_extension_is_rejected() {
        let err = load_program(Path::new("story.txt")).expect_err("unsupported");
        assert!(matches!(err, SourceError::UnsupportedFormat { .. }));
    }
}

//! Protobuf messages of a compiled Yarn v1 program (`.yarnc`) and their
//! conversion to the [`yarn_data`] model.

use std::collections::BTreeMap;

use prost::Message;
use yarn_data::Opcode;

use crate::sources::SourceError;

#[derive(Clone, PartialEq, Message)]
pub struct Program {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(btree_map = "string, message", tag = "2")]
    pub nodes: BTreeMap<String, Node>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Node {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub instructions: Vec<Instruction>,
    #[prost(btree_map = "string, int32", tag = "3")]
    pub labels: BTreeMap<String, i32>,
    #[prost(string, repeated, tag = "4")]
    pub tags: Vec<String>,
    #[prost(string, tag = "5")]
    pub source_text_string_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Instruction {
    #[prost(int32, tag = "1")]
    pub opcode: i32,
    #[prost(message, repeated, tag = "2")]
    pub operands: Vec<Operand>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Operand {
    #[prost(oneof = "operand::Value", tags = "1, 2, 3")]
    pub value: Option<operand::Value>,
}

pub mod operand {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Value {
        #[prost(string, tag = "1")]
        StringValue(String),
        #[prost(bool, tag = "2")]
        BoolValue(bool),
        #[prost(float, tag = "3")]
        FloatValue(f32),
    }
}

/// Decode `.yarnc` bytes into the shared program model.
///
/// # Errors
/// Fails on malformed protobuf, unknown opcodes and negative label indices.
pub fn decode_program(bytes: &[u8], path: &std::path::Path) -> Result<yarn_data::Program, SourceError> {
    let program = Program::decode(bytes).map_err(|source| SourceError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    program.into_model()
}

/// Encode the shared program model as `.yarnc` bytes.
pub fn encode_program(program: &yarn_data::Program) -> Vec<u8> {
    Program::from_model(program).encode_to_vec()
}

impl Program {
    pub fn into_model(self) -> Result<yarn_data::Program, SourceError> {
        let mut nodes = BTreeMap::new();
        for (key, node) in self.nodes {
            // Older compilers leave the node's own name empty; the map key is authoritative.
            let name = if node.name.is_empty() { key.clone() } else { node.name.clone() };
            nodes.insert(key, node.into_model(name)?);
        }
        Ok(yarn_data::Program { name: self.name, nodes })
    }

    pub fn from_model(program: &yarn_data::Program) -> Self {
        Self {
            name: program.name.clone(),
            nodes: program
                .nodes
                .iter()
                .map(|(key, node)| (key.clone(), Node::from_model(node)))
                .collect(),
        }
    }
}

impl Node {
    fn into_model(self, name: String) -> Result<yarn_data::Node, SourceError> {
        let mut instructions = Vec::with_capacity(self.instructions.len());
        for (index, instruction) in self.instructions.into_iter().enumerate() {
            let opcode = Opcode::from_wire(instruction.opcode).ok_or_else(|| SourceError::UnknownOpcode {
                node: name.clone(),
                index,
                code: instruction.opcode,
            })?;
            let operands = instruction.operands.into_iter().map(Operand::into_model).collect();
            instructions.push(yarn_data::Instruction { opcode, operands });
        }

        let mut labels = BTreeMap::new();
        for (label, index) in self.labels {
            let index = usize::try_from(index).map_err(|_| SourceError::InvalidLabel {
                node: name.clone(),
                label: label.clone(),
                index,
            })?;
            labels.insert(label, index);
        }

        Ok(yarn_data::Node {
            name,
            instructions,
            labels,
            tags: self.tags,
        })
    }

    fn from_model(node: &yarn_data::Node) -> Self {
        Self {
            name: node.name.clone(),
            instructions: node
                .instructions
                .iter()
                .map(|i| Instruction {
                    opcode: i.opcode as i32,
                    operands: i.operands.iter().map(Operand::from_model).collect(),
                })
                .collect(),
            labels: node
                .labels
                .iter()
                .map(|(label, index)| (label.clone(), i32::try_from(*index).unwrap_or(i32::MAX)))
                .collect(),
            tags: node.tags.clone(),
            source_text_string_id: String::new(),
        }
    }
}

impl Operand {
    fn into_model(self) -> yarn_data::Operand {
        match self.value {
            None => yarn_data::Operand::None,
            Some(operand::Value::StringValue(s)) => yarn_data::Operand::String(s),
            Some(operand::Value::BoolValue(b)) => yarn_data::Operand::Bool(b),
            Some(operand::Value::FloatValue(f)) => yarn_data::Operand::Float(f),
        }
    }

    fn from_model(operand: &yarn_data::Operand) -> Self {
        let value = match operand {
            yarn_data::Operand::None => None,
            yarn_data::Operand::String(s) => Some(operand::Value::StringValue(s.clone())),
            yarn_data::Operand::Bool(b) => Some(operand::Value::BoolValue(*b)),
            yarn_data::Operand::Float(f) => Some(operand::Value::FloatValue(*f)),
        };
        Self { value }
    }
}

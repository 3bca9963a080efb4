use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operation tag of one compiled Yarn instruction.
///
/// Discriminants match the wire codes written by the Yarn v1 compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Jumps to the label in operand 0.
    JumpTo = 0,
    /// Jumps to the label on top of the stack.
    Jump = 1,
    /// Delivers the line key in operand 0; operand 1 (when present) is the substitution count.
    RunLine = 2,
    /// Delivers the command text in operand 0.
    RunCommand = 3,
    /// Adds an option: operand 0 is the line key, operand 1 the destination label or node.
    AddOption = 4,
    ShowOptions = 5,
    PushString = 6,
    PushFloat = 7,
    PushBool = 8,
    PushNull = 9,
    /// Jumps to the label in operand 0 when the top of the stack is falsy. Does not pop.
    JumpIfFalse = 10,
    Pop = 11,
    /// Calls the function named in operand 0; its argument count is on top of the stack.
    CallFunc = 12,
    PushVariable = 13,
    StoreVariable = 14,
    Stop = 15,
    /// Runs the node in operand 0, or the node named on top of the stack.
    RunNode = 16,
}

impl Opcode {
    pub const ALL: [Opcode; 17] = [
        Opcode::JumpTo,
        Opcode::Jump,
        Opcode::RunLine,
        Opcode::RunCommand,
        Opcode::AddOption,
        Opcode::ShowOptions,
        Opcode::PushString,
        Opcode::PushFloat,
        Opcode::PushBool,
        Opcode::PushNull,
        Opcode::JumpIfFalse,
        Opcode::Pop,
        Opcode::CallFunc,
        Opcode::PushVariable,
        Opcode::StoreVariable,
        Opcode::Stop,
        Opcode::RunNode,
    ];

    /// Decode a wire opcode.
    pub fn from_wire(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as i32 == code)
    }

    /// Operand-producing opcodes. These never end a statement.
    pub fn is_push(self) -> bool {
        matches!(
            self,
            Opcode::PushBool | Opcode::PushFloat | Opcode::PushNull | Opcode::PushString | Opcode::PushVariable
        )
    }

    pub fn is_command(self) -> bool {
        matches!(self, Opcode::CallFunc | Opcode::RunCommand)
    }

    /// Opcodes that close the statement they appear in.
    pub fn is_statement_terminating(self) -> bool {
        matches!(
            self,
            Opcode::AddOption
                | Opcode::Jump
                | Opcode::JumpIfFalse
                | Opcode::JumpTo
                | Opcode::Pop
                | Opcode::RunCommand
                | Opcode::RunLine
                | Opcode::RunNode
                | Opcode::ShowOptions
                | Opcode::Stop
                | Opcode::StoreVariable
        )
    }
}

/// Literal kind carried by an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    None,
    String,
    Bool,
    Float,
}

/// Typed operand of an instruction. Labels, keys, variable and node names are strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    None,
    String(String),
    Bool(bool),
    Float(f32),
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::None => OperandKind::None,
            Operand::String(_) => OperandKind::String,
            Operand::Bool(_) => OperandKind::Bool,
            Operand::Float(_) => OperandKind::Float,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Operand::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Operand::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// One bytecode instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    #[serde(default)]
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self { opcode, operands }
    }

    /// An instruction without operands (`Pop`, `Stop`, `ShowOptions`, ...).
    pub fn bare(opcode: Opcode) -> Self {
        Self::new(opcode, Vec::new())
    }

    pub fn push_string(value: impl Into<String>) -> Self {
        Self::new(Opcode::PushString, vec![Operand::String(value.into())])
    }

    pub fn push_float(value: f32) -> Self {
        Self::new(Opcode::PushFloat, vec![Operand::Float(value)])
    }

    pub fn push_bool(value: bool) -> Self {
        Self::new(Opcode::PushBool, vec![Operand::Bool(value)])
    }

    pub fn push_variable(name: impl Into<String>) -> Self {
        Self::new(Opcode::PushVariable, vec![Operand::String(name.into())])
    }

    pub fn store_variable(name: impl Into<String>) -> Self {
        Self::new(Opcode::StoreVariable, vec![Operand::String(name.into())])
    }

    pub fn jump_to(label: impl Into<String>) -> Self {
        Self::new(Opcode::JumpTo, vec![Operand::String(label.into())])
    }

    pub fn jump_if_false(label: impl Into<String>) -> Self {
        Self::new(Opcode::JumpIfFalse, vec![Operand::String(label.into())])
    }

    pub fn run_line(key: impl Into<String>) -> Self {
        Self::new(Opcode::RunLine, vec![Operand::String(key.into())])
    }

    pub fn run_command(text: impl Into<String>) -> Self {
        Self::new(Opcode::RunCommand, vec![Operand::String(text.into())])
    }

    pub fn run_node(node: impl Into<String>) -> Self {
        Self::new(Opcode::RunNode, vec![Operand::String(node.into())])
    }

    pub fn add_option(key: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::new(
            Opcode::AddOption,
            vec![Operand::String(key.into()), Operand::String(destination.into())],
        )
    }

    pub fn call_func(name: impl Into<String>) -> Self {
        Self::new(Opcode::CallFunc, vec![Operand::String(name.into())])
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }

    pub fn string_operand(&self, index: usize) -> Option<&str> {
        self.operand(index).and_then(Operand::as_str)
    }
}

/// A named, compiled Yarn node: one future conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    /// Jump table: label name to instruction index.
    #[serde(default)]
    pub labels: BTreeMap<String, usize>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A compiled Yarn program. Nodes are kept ordered by name so every pass over
/// them is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: BTreeMap<String, Node>,
}

impl Program {
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }
}

/// Default-locale text of one line, as written by the Yarn compiler's string table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringInfo {
    pub text: String,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub line_number: u32,
    #[serde(default)]
    pub file: String,
}

/// Line key to default text.
pub type StringTable = BTreeMap<String, StringInfo>;

/// One row of a localized string table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedString {
    pub locale: String,
    pub key: String,
    pub text: String,
    pub file: String,
    pub node: String,
}

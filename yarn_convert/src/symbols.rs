//! Variables and commands discovered while classifying statements.

use std::collections::BTreeMap;

use yarn_data::{FieldType, OperandKind};

/// Inferred type of a Yarn variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Bool,
    Float,
    String,
    None,
}

impl VariableKind {
    pub fn from_operand(kind: OperandKind) -> Self {
        match kind {
            OperandKind::Bool => VariableKind::Bool,
            OperandKind::Float => VariableKind::Float,
            OperandKind::String => VariableKind::String,
            OperandKind::None => VariableKind::None,
        }
    }

    pub fn field_type(self) -> FieldType {
        match self {
            VariableKind::Bool => FieldType::Boolean,
            VariableKind::Float => FieldType::Number,
            VariableKind::String | VariableKind::None => FieldType::Text,
        }
    }

    fn default_value(self) -> Option<String> {
        match self {
            VariableKind::Bool => Some("false".to_string()),
            VariableKind::Float => Some("0".to_string()),
            VariableKind::String | VariableKind::None => None,
        }
    }
}

/// A variable as written in Yarn, leading `$` included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YarnVariable {
    pub name: String,
    pub kind: VariableKind,
    pub initial_value: Option<String>,
    /// Global variables become database variables; local ones live only in Lua.
    pub is_global: bool,
}

impl YarnVariable {
    pub fn global(name: impl Into<String>, kind: VariableKind) -> Self {
        Self {
            name: name.into(),
            kind,
            initial_value: kind.default_value(),
            is_global: true,
        }
    }

    /// An option gating flag. Starts out `nil` so the option stays hidden until triggered.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::Bool,
            initial_value: Some("nil".to_string()),
            is_global: false,
        }
    }
}

pub const SET_SEQUENCE_COMMAND: &str = "sequence";
/// `<<seq Command()>>` plays a raw sequence as its own entry.
pub const RAW_SEQUENCE_COMMAND: &str = "seq";
pub const WAIT_COMMAND: &str = "wait";
pub const STOP_COMMAND: &str = "stop";

/// A custom command or function called by the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YarnCommand {
    pub name: String,
    pub parameter_count: usize,
}

impl YarnCommand {
    pub fn new(name: impl Into<String>, parameter_count: usize) -> Self {
        Self {
            name: name.into(),
            parameter_count,
        }
    }

    /// Parse `<<name arg arg ...>>` text: the first token names the command, the rest are parameters.
    pub fn from_command_text(text: &str) -> Self {
        let mut tokens = text.split_whitespace();
        let name = tokens.next().unwrap_or_default();
        Self::new(name, tokens.count())
    }

    /// Commands the runtime already understands.
    pub fn is_built_in(&self) -> bool {
        self.name == WAIT_COMMAND || self.name == STOP_COMMAND
    }

    pub fn is_set_sequence(&self) -> bool {
        self.name == SET_SEQUENCE_COMMAND
    }

    /// Sequencer directives never reach the command registry.
    pub fn is_sequence_directive(&self) -> bool {
        self.is_set_sequence() || self.name == RAW_SEQUENCE_COMMAND
    }
}

/// Project-wide variable and command registry.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    pub variables: BTreeMap<String, YarnVariable>,
    pub commands: BTreeMap<String, YarnCommand>,
}

impl SymbolTable {
    pub fn variable(&self, name: &str) -> Option<&YarnVariable> {
        self.variables.get(name)
    }

    /// Register a global variable unless the name is already known.
    pub fn register_variable(&mut self, name: &str, kind: VariableKind) {
        self.variables
            .entry(name.to_string())
            .or_insert_with(|| YarnVariable::global(name, kind));
    }

    /// Register a command unless the name is already known.
    pub fn register_command(&mut self, command: YarnCommand) {
        self.commands.entry(command.name.clone()).or_insert(command);
    }

    /// First `<prefix><n>` not yet taken, counting from 1.
    pub fn unique_variable_name(&self, prefix: &str) -> String {
        (1..)
            .map(|n| format!("{prefix}{n}"))
            .find(|name| !self.variables.contains_key(name))
            .unwrap_or_else(|| prefix.to_string())
    }

    /// Allocate a fresh local flag variable and return its name.
    pub fn create_local_variable(&mut self, prefix: &str) -> String {
        let name = self.unique_variable_name(prefix);
        self.variables.insert(name.clone(), YarnVariable::local(name.as_str()));
        name
    }

    /// Global variables, sorted by name.
    pub fn globals(&self) -> impl Iterator<Item = &YarnVariable> {
        self.variables.values().filter(|v| v.is_global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_text_counts_parameters() {
        let cmd = YarnCommand::from_command_text("move Sally  left 3");
        assert_eq!(cmd, YarnCommand::new("move", 3));
        assert!(YarnCommand::from_command_text("sequence Camera(zoom)").is_set_sequence());
        assert!(YarnCommand::from_command_text("seq Fade(in)").is_sequence_directive());
        assert!(YarnCommand::from_command_text("wait 2").is_built_in());
    }

    #[test]
    fn registration_keeps_first_definition() {
        let mut symbols = SymbolTable::default();
        symbols.register_variable("$gold", VariableKind::Float);
        symbols.register_variable("$gold", VariableKind::String);
        let gold = symbols.variable("$gold").expect("registered");
        assert_eq!(gold.kind, VariableKind::Float);
        assert_eq!(gold.initial_value.as_deref(), Some("0"));
        assert!(gold.is_global);
    }

    #[test]
    fn local_flags_are_unique_and_not_global() {
        let mut symbols = SymbolTable::default();
        let first = symbols.create_local_variable("$Shop_opt_cond_");
        let second = symbols.create_local_variable("$Shop_opt_cond_");
        assert_eq!(first, "$Shop_opt_cond_1");
        assert_eq!(second, "$Shop_opt_cond_2");
        assert_eq!(symbols.globals().count(), 0);
        assert_eq!(symbols.variable(&first).and_then(|v| v.initial_value.as_deref()), Some("nil"));
    }
}

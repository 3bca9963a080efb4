//! Built-in Yarn operators, as named by `CallFunc` instructions.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::symbols::VariableKind;

/// Operators the Yarn compiler emits as `CallFunc` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltInOperator {
    EqualTo,
    GreaterThan,
    GreaterThanOrEqualTo,
    LessThan,
    LessThanOrEqualTo,
    NotEqualTo,
    Or,
    And,
    Xor,
    Not,
    EqualToOrAssign,
    UnaryMinus,
    Add,
    Minus,
    Multiply,
    Divide,
    Modulo,
    AddAssign,
    MinusAssign,
    MultiplyAssign,
    DivideAssign,
}

static OPERATORS_BY_NAME: LazyLock<HashMap<&'static str, BuiltInOperator>> =
    LazyLock::new(|| BuiltInOperator::ALL.iter().map(|op| (op.name(), *op)).collect());

impl BuiltInOperator {
    pub const ALL: [BuiltInOperator; 21] = [
        BuiltInOperator::EqualTo,
        BuiltInOperator::GreaterThan,
        BuiltInOperator::GreaterThanOrEqualTo,
        BuiltInOperator::LessThan,
        BuiltInOperator::LessThanOrEqualTo,
        BuiltInOperator::NotEqualTo,
        BuiltInOperator::Or,
        BuiltInOperator::And,
        BuiltInOperator::Xor,
        BuiltInOperator::Not,
        BuiltInOperator::EqualToOrAssign,
        BuiltInOperator::UnaryMinus,
        BuiltInOperator::Add,
        BuiltInOperator::Minus,
        BuiltInOperator::Multiply,
        BuiltInOperator::Divide,
        BuiltInOperator::Modulo,
        BuiltInOperator::AddAssign,
        BuiltInOperator::MinusAssign,
        BuiltInOperator::MultiplyAssign,
        BuiltInOperator::DivideAssign,
    ];

    /// Look up an operator by its bytecode function name.
    pub fn from_name(name: &str) -> Option<Self> {
        OPERATORS_BY_NAME.get(name).copied()
    }

    pub fn is_built_in(name: &str) -> bool {
        Self::from_name(name).is_some()
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltInOperator::EqualTo => "EqualTo",
            BuiltInOperator::GreaterThan => "GreaterThan",
            BuiltInOperator::GreaterThanOrEqualTo => "GreaterThanOrEqualTo",
            BuiltInOperator::LessThan => "LessThan",
            BuiltInOperator::LessThanOrEqualTo => "LessThanOrEqualTo",
            BuiltInOperator::NotEqualTo => "NotEqualTo",
            BuiltInOperator::Or => "Or",
            BuiltInOperator::And => "And",
            BuiltInOperator::Xor => "Xor",
            BuiltInOperator::Not => "Not",
            BuiltInOperator::EqualToOrAssign => "EqualToOrAssign",
            BuiltInOperator::UnaryMinus => "UnaryMinus",
            BuiltInOperator::Add => "Add",
            BuiltInOperator::Minus => "Minus",
            BuiltInOperator::Multiply => "Multiply",
            BuiltInOperator::Divide => "Divide",
            BuiltInOperator::Modulo => "Modulo",
            BuiltInOperator::AddAssign => "AddAssign",
            BuiltInOperator::MinusAssign => "MinusAssign",
            BuiltInOperator::MultiplyAssign => "MultiplyAssign",
            BuiltInOperator::DivideAssign => "DivideAssign",
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(self, BuiltInOperator::Not | BuiltInOperator::UnaryMinus)
    }

    /// Accessor into the `YarnOperatorType` table of the global user script.
    pub fn lua_operator_type(self) -> String {
        format!("YarnOperatorType.{}", self.name())
    }

    /// Kind of value the operator leaves on the stack.
    ///
    /// `Add` is treated as numeric even though Yarn also uses it for string concatenation.
    pub fn result_kind(self) -> VariableKind {
        match self {
            BuiltInOperator::EqualTo
            | BuiltInOperator::GreaterThan
            | BuiltInOperator::GreaterThanOrEqualTo
            | BuiltInOperator::LessThan
            | BuiltInOperator::LessThanOrEqualTo
            | BuiltInOperator::NotEqualTo
            | BuiltInOperator::Or
            | BuiltInOperator::And
            | BuiltInOperator::Xor
            | BuiltInOperator::Not => VariableKind::Bool,
            BuiltInOperator::UnaryMinus
            | BuiltInOperator::Add
            | BuiltInOperator::Minus
            | BuiltInOperator::Multiply
            | BuiltInOperator::Divide
            | BuiltInOperator::Modulo => VariableKind::Float,
            BuiltInOperator::EqualToOrAssign
            | BuiltInOperator::AddAssign
            | BuiltInOperator::MinusAssign
            | BuiltInOperator::MultiplyAssign
            | BuiltInOperator::DivideAssign => VariableKind::None,
        }
    }
}

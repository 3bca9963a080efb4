//! Statement classification: cut a node's instruction stream into basic statements.

use log::debug;
use yarn_data::{Instruction, Node, Opcode};

use crate::ConvertError;
use crate::operators::BuiltInOperator;
use crate::statement::BasicStatement;
use crate::symbols::{SymbolTable, VariableKind, YarnCommand};

/// Classify the statement starting at `start`.
///
/// The statement runs through the next statement-terminating instruction (or
/// the end of the node). A store-variable also takes the pop that follows it.
/// Variables and commands met along the way are registered in `symbols`.
/// Returns `Ok(None)` when `start` is past the end of the node.
pub(crate) fn classify_statement(
    node: &Node,
    start: usize,
    symbols: &mut SymbolTable,
) -> Result<Option<BasicStatement>, ConvertError> {
    let mut instructions: Vec<Instruction> = Vec::new();
    let mut index = start;

    while let Some(instruction) = node.instructions.get(index) {
        instructions.push(instruction.clone());
        match instruction.opcode {
            Opcode::StoreVariable => {
                let name = operand_str(node, index, instruction, 0)?;
                let kind = infer_store_kind(&instructions, symbols);
                symbols.register_variable(name, kind);
                if let Some(pop) = node.instructions.get(index + 1).filter(|i| i.opcode == Opcode::Pop) {
                    instructions.push(pop.clone());
                }
            },
            Opcode::CallFunc => {
                let name = operand_str(node, index, instruction, 0)?;
                if !BuiltInOperator::is_built_in(name) {
                    let parameter_count = index
                        .checked_sub(1)
                        .and_then(|i| node.instructions.get(i))
                        .and_then(|i| i.operand(0))
                        .and_then(|op| op.as_float())
                        .map_or(0, |count| count.max(0.0) as usize);
                    debug!("node '{}': function '{name}' takes {parameter_count} argument(s)", node.name);
                    symbols.register_command(YarnCommand::new(name, parameter_count));
                }
            },
            Opcode::RunCommand => {
                let command = YarnCommand::from_command_text(operand_str(node, index, instruction, 0)?);
                if !command.is_sequence_directive() && !BuiltInOperator::is_built_in(&command.name) {
                    symbols.register_command(command);
                }
            },
            _ => {},
        }
        if instruction.opcode.is_statement_terminating() {
            break;
        }
        index += 1;
    }

    Ok(BasicStatement::new(instructions))
}

/// Type of the value a store-variable takes, judged from the instruction feeding it.
fn infer_store_kind(instructions: &[Instruction], symbols: &SymbolTable) -> VariableKind {
    let Some(feed) = instructions.len().checked_sub(2).map(|i| &instructions[i]) else {
        return VariableKind::None;
    };
    match feed.opcode {
        Opcode::PushBool | Opcode::PushFloat | Opcode::PushString => feed
            .operand(0)
            .map_or(VariableKind::None, |op| VariableKind::from_operand(op.kind())),
        Opcode::PushVariable => feed
            .string_operand(0)
            .and_then(|name| symbols.variable(name))
            .map_or(VariableKind::None, |v| v.kind),
        Opcode::CallFunc => feed
            .string_operand(0)
            .and_then(BuiltInOperator::from_name)
            .map_or(VariableKind::None, BuiltInOperator::result_kind),
        _ => VariableKind::None,
    }
}

fn operand_str<'a>(
    node: &Node,
    index: usize,
    instruction: &'a Instruction,
    operand: usize,
) -> Result<&'a str, ConvertError> {
    instruction.string_operand(operand).ok_or_else(|| ConvertError::MissingOperand {
        node: node.name.clone(),
        index,
        opcode: instruction.opcode,
        operand,
    })
}

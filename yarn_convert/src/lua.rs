//! Lua emitted into dialogue entries: conditions, variable stores, string
//! format arguments and custom command calls.
//!
//! Expressions are not translated into Lua syntax. A statement's pushes and
//! calls are written out as a flat Lua table and handed to
//! `EvaluateYarnExpression`, a small stack machine shipped in the global user
//! script, which replays them at runtime.

use std::sync::LazyLock;

use regex::Regex;
use yarn_data::{DbId, Opcode, Operand};

use crate::ConvertError;
use crate::operators::BuiltInOperator;
use crate::statement::BasicStatement;

pub const EVALUATE_EXPRESSION: &str = "EvaluateYarnExpression";
pub const RUN_COMMAND_ARGUMENTS: &str = "run_cmd_args";
pub const CLEAR_AND_ADD_FORMAT_ARGUMENT: &str = "clr_add_str_fmt_arg";
pub const ADD_FORMAT_ARGUMENT: &str = "add_str_fmt_arg";

static RUNTIME_ARGUMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{(\d+)\}$").expect("valid runtime argument pattern"));

static COMMAND_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"-?\d+(?:\.\d+)?|\w+|"[\w\s.']*"|'[\w\s.]*'|\{[\w\s.]*\}"#).expect("valid command token pattern")
});

/// Strip the leading `$` of a Yarn variable.
pub fn lua_variable_name(yarn_name: &str) -> Result<&str, ConvertError> {
    yarn_name
        .strip_prefix('$')
        .ok_or_else(|| ConvertError::InvalidVariableName {
            name: yarn_name.to_string(),
        })
}

/// `Variable['name']`
pub fn variable_table_access(yarn_name: &str) -> Result<String, ConvertError> {
    Ok(format!("Variable['{}']", lua_variable_name(yarn_name)?))
}

/// `_G['name']`
pub fn custom_command(name: &str) -> String {
    format!("_G['{name}']")
}

pub fn format_operand(operand: &Operand) -> String {
    match operand {
        Operand::None => "nil".to_string(),
        Operand::Bool(value) => value.to_string(),
        Operand::Float(value) => value.to_string(),
        Operand::String(text) => format!("'{}'", escape(text)),
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\0' => escaped.push_str("\\0"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// The statement's pushes and calls as a Lua table literal, e.g.
/// `{ Variable['gold'], 10, 2, YarnOperatorType.GreaterThan }`.
///
/// Pops are skipped and the first terminator ends the list.
pub fn instruction_list(stmt: &BasicStatement) -> Result<String, ConvertError> {
    let mut items = Vec::new();
    for instruction in stmt.instructions() {
        match instruction.opcode {
            Opcode::Pop => continue,
            Opcode::PushVariable => {
                let name = instruction.string_operand(0).ok_or(ConvertError::MalformedExpression {
                    opcode: instruction.opcode,
                })?;
                items.push(variable_table_access(name)?);
            },
            Opcode::PushNull => items.push(format_operand(&Operand::None)),
            Opcode::PushBool | Opcode::PushFloat | Opcode::PushString => {
                let operand = instruction.operand(0).ok_or(ConvertError::MalformedExpression {
                    opcode: instruction.opcode,
                })?;
                items.push(format_operand(operand));
            },
            Opcode::CallFunc => {
                let name = instruction.string_operand(0).ok_or(ConvertError::MalformedExpression {
                    opcode: instruction.opcode,
                })?;
                items.push(match BuiltInOperator::from_name(name) {
                    Some(op) => op.lua_operator_type(),
                    None => custom_command(name),
                });
            },
            Opcode::JumpTo
            | Opcode::Jump
            | Opcode::RunLine
            | Opcode::RunCommand
            | Opcode::AddOption
            | Opcode::ShowOptions
            | Opcode::JumpIfFalse
            | Opcode::StoreVariable
            | Opcode::Stop
            | Opcode::RunNode => break,
        }
    }
    Ok(format!("{{ {} }}", items.join(", ")))
}

/// Conditions string of an entry guarded by `stmt`.
pub fn conditions(stmt: &BasicStatement) -> Result<String, ConvertError> {
    Ok(format!("{EVALUATE_EXPRESSION}({})[1]\n", instruction_list(stmt)?))
}

/// Assignment of the statement's expression to a database variable.
pub fn set_variable(yarn_name: &str, stmt: &BasicStatement) -> Result<String, ConvertError> {
    Ok(format!(
        "{} = {EVALUATE_EXPRESSION}({})[1]\n",
        variable_table_access(yarn_name)?,
        instruction_list(stmt)?
    ))
}

/// Raise an option's gating flag.
pub fn option_conditions(flag: &str) -> Result<String, ConvertError> {
    Ok(format!("{} = true\n", lua_variable_name(flag)?))
}

/// Compute the substitutions of a line and hand them to the entry that shows it.
pub fn format_string_arguments(
    conversation: DbId,
    entry: DbId,
    stmt: &BasicStatement,
) -> Result<String, ConvertError> {
    let list = instruction_list(stmt)?;
    Ok(format!(
        "local is_first = true
for _, value in ipairs({EVALUATE_EXPRESSION}({list})) do
    if is_first then
        {CLEAR_AND_ADD_FORMAT_ARGUMENT}({conversation}, {entry}, tostring(value))
    else
        {ADD_FORMAT_ARGUMENT}({conversation}, {entry}, tostring(value))
    end

    is_first = false
end
"
    ))
}

/// Wrap a command call whose arguments are computed at runtime.
pub fn run_command_with_runtime_arguments(call: &str, stmt: &BasicStatement) -> Result<String, ConvertError> {
    Ok(format!(
        "local {RUN_COMMAND_ARGUMENTS} = {EVALUATE_EXPRESSION}({})\n{call}\n",
        instruction_list(stmt)?
    ))
}

/// Split command text into tokens. Quoted strings and `{n}` placeholders
/// stay whole; any other non-blank run between tokens becomes a token too.
pub fn command_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut residue_start = 0;
    for m in COMMAND_TOKEN.find_iter(text) {
        push_residue(&mut tokens, &text[residue_start..m.start()]);
        tokens.push(m.as_str().to_string());
        residue_start = m.end();
    }
    push_residue(&mut tokens, &text[residue_start..]);
    tokens
}

fn push_residue(tokens: &mut Vec<String>, residue: &str) {
    let residue = residue.trim();
    if !residue.is_empty() {
        tokens.push(residue.to_string());
    }
}

/// Placeholder index of a `{n}` token.
pub fn runtime_argument_index(token: &str) -> Option<usize> {
    RUNTIME_ARGUMENT
        .captures(token)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Lua call of a custom command. Bare words are quoted; numbers, booleans and
/// quoted strings pass through; `{n}` placeholders read the runtime argument
/// table when the statement computes arguments.
pub fn command_call(tokens: &[String], has_arguments: bool) -> Option<String> {
    let (name, arguments) = tokens.split_first()?;
    let arguments: Vec<String> = arguments
        .iter()
        .map(|token| match runtime_argument_index(token) {
            Some(index) if has_arguments => format!("{RUN_COMMAND_ARGUMENTS}[{}]", index + 1),
            _ if is_literal(token) => token.clone(),
            _ => format!("'{}'", escape(token)),
        })
        .collect();
    Some(format!("{}({})", custom_command(name), arguments.join(", ")))
}

fn is_literal(token: &str) -> bool {
    let quoted = token.len() >= 2
        && [('\'', '\''), ('"', '"')]
            .iter()
            .any(|(open, close)| token.starts_with(*open) && token.ends_with(*close));
    quoted || is_number(token) || token.eq_ignore_ascii_case("true") || token.eq_ignore_ascii_case("false")
}

/// Plain decimal numbers only; `inf` and `NaN` are words to Lua.
fn is_number(token: &str) -> bool {
    let digits = token.strip_prefix('-').unwrap_or(token);
    digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.matches('.').count() <= 1
}

/// Operator table and expression evaluator every generated script relies on.
pub const GLOBAL_USER_SCRIPT: &str = r"-- Yarn support. Generated scripts call into this block; keep it first.
YarnOperatorType = {
    UnaryMinus = function(value) return -value end,
    Add = function(lhs, rhs)
        if type(lhs) == 'string' or type(rhs) == 'string' then
            return tostring(lhs) .. tostring(rhs)
        end
        return lhs + rhs
    end,
    Minus = function(lhs, rhs) return lhs - rhs end,
    Multiply = function(lhs, rhs) return lhs * rhs end,
    Divide = function(lhs, rhs) return lhs / rhs end,
    Modulo = function(lhs, rhs) return lhs % rhs end,

    -- Compound assignments are expanded by the compiler and never reach here.
    AddAssign = function(lhs, rhs) return nil end,
    MinusAssign = function(lhs, rhs) return nil end,
    MultiplyAssign = function(lhs, rhs) return nil end,
    DivideAssign = function(lhs, rhs) return nil end,
    EqualToOrAssign = function(lhs, rhs) return lhs == rhs end,

    Or = function(lhs, rhs) return lhs or rhs end,
    And = function(lhs, rhs) return lhs and rhs end,
    Xor = function(lhs, rhs) return (lhs and not rhs) or (not lhs and rhs) end,
    Not = function(value) return not value end,

    EqualTo = function(lhs, rhs) return lhs == rhs end,
    NotEqualTo = function(lhs, rhs) return lhs ~= rhs end,
    GreaterThan = function(lhs, rhs) return lhs > rhs end,
    GreaterThanOrEqualTo = function(lhs, rhs) return lhs >= rhs end,
    LessThan = function(lhs, rhs) return lhs < rhs end,
    LessThanOrEqualTo = function(lhs, rhs) return lhs <= rhs end
}

local unpack_args = table.unpack or unpack

-- Replays a flat list of pushed values and calls. A function pops its
-- argument count, then that many arguments, and pushes its result.
-- Returns the remaining stack, bottom first.
function EvaluateYarnExpression(instruction_list)
    local stack = {}
    for _, instruction in ipairs(instruction_list) do
        if type(instruction) == 'function' then
            local count = table.remove(stack) or 0
            local args = {}
            for i = count, 1, -1 do
                args[i] = table.remove(stack)
            end
            stack[#stack + 1] = instruction(unpack_args(args, 1, count))
        else
            stack[#stack + 1] = instruction
        end
    end
    return stack
end
";

#[cfg(test)]
mod tests {
    use super::*;
    use yarn_data::Instruction;

    fn stmt(instructions: Vec<Instruction>) -> BasicStatement {
        BasicStatement::new(instructions).expect("non-empty")
    }

    #[test]
    fn instruction_list_formats_pushes_and_calls() {
        let stmt = stmt(vec![
            Instruction::push_variable("$gold"),
            Instruction::push_float(10.0),
            Instruction::push_float(2.0),
            Instruction::call_func("GreaterThan"),
            Instruction::push_string("it's"),
            Instruction::push_bool(true),
            Instruction::bare(Opcode::PushNull),
            Instruction::push_float(0.5),
            Instruction::call_func("visited"),
            Instruction::jump_if_false("skip"),
            Instruction::push_string("after terminator"),
        ]);
        assert_eq!(
            instruction_list(&stmt).expect("list"),
            "{ Variable['gold'], 10, 2, YarnOperatorType.GreaterThan, 'it\\'s', true, nil, 0.5, _G['visited'] }"
        );
    }

    #[test]
    fn scripts_wrap_the_instruction_list() {
        let cond = stmt(vec![Instruction::push_variable("$met"), Instruction::jump_if_false("skip")]);
        assert_eq!(
            conditions(&cond).expect("conditions"),
            "EvaluateYarnExpression({ Variable['met'] })[1]\n"
        );

        let store = stmt(vec![
            Instruction::push_bool(true),
            Instruction::store_variable("$met"),
            Instruction::bare(Opcode::Pop),
        ]);
        assert_eq!(
            set_variable("$met", &store).expect("store"),
            "Variable['met'] = EvaluateYarnExpression({ true })[1]\n"
        );
        assert_eq!(
            option_conditions("$Start_opt_cond_1").expect("flag"),
            "Start_opt_cond_1 = true\n"
        );
    }

    #[test]
    fn format_arguments_address_the_entry() {
        let line = stmt(vec![Instruction::push_variable("$name"), Instruction::run_line("line:1")]);
        let script = format_string_arguments(3, 7, &line).expect("script");
        assert!(script.starts_with("local is_first = true\nfor _, value in ipairs(EvaluateYarnExpression({ Variable['name'] })) do\n"));
        assert!(script.contains("clr_add_str_fmt_arg(3, 7, tostring(value))"));
        assert!(script.contains("        add_str_fmt_arg(3, 7, tostring(value))"));
        assert!(script.ends_with("    is_first = false\nend\n"));
    }

    #[test]
    fn variables_need_a_dollar_prefix() {
        let err = variable_table_access("gold").expect_err("no prefix");
        assert!(matches!(err, ConvertError::InvalidVariableName { name } if name == "gold"));
    }

    #[test]
    fn command_tokens_keep_quotes_and_placeholders() {
        assert_eq!(
            command_tokens(r#"give_item "rusty key" 'old map' 2.5 {0} -3"#),
            vec!["give_item", "\"rusty key\"", "'old map'", "2.5", "{0}", "-3"]
        );
        assert_eq!(command_tokens("fade ~ out"), vec!["fade", "~", "out"]);
    }

    #[test]
    fn command_call_quotes_bare_words() {
        let tokens = command_tokens("move Sally 3 true {1} {0}");
        assert_eq!(
            command_call(&tokens, true).as_deref(),
            Some("_G['move']('Sally', 3, true, run_cmd_args[2], run_cmd_args[1])")
        );
        assert_eq!(
            command_call(&tokens, false).as_deref(),
            Some("_G['move']('Sally', 3, true, '{1}', '{0}')")
        );
        assert_eq!(command_call(&[], false), None);
    }

    #[test]
    fn only_plain_numbers_stay_unquoted() {
        let tokens: Vec<String> = ["move", "inf", "NaN", "infinity", "-2.5", "1.2.3", "-"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            command_call(&tokens, false).as_deref(),
            Some("_G['move']('inf', 'NaN', 'infinity', -2.5, '1.2.3', '-')")
        );
    }

    #[test]
    fn string_operands_escape_line_breaks() {
        assert_eq!(
            format_operand(&Operand::String("it's\na\r\0b\\".into())),
            "'it\\'s\\na\\r\\0b\\\\'"
        );
    }

    #[test]
    fn runtime_arguments_are_evaluated_first() {
        let cmd = stmt(vec![Instruction::push_variable("$item"), Instruction::run_command("give {0}")]);
        assert_eq!(
            run_command_with_runtime_arguments("_G['give'](run_cmd_args[1])", &cmd).expect("script"),
            "local run_cmd_args = EvaluateYarnExpression({ Variable['item'] })\n_G['give'](run_cmd_args[1])\n"
        );
    }

    #[test]
    fn global_script_defines_every_operator() {
        for op in BuiltInOperator::ALL {
            assert!(
                GLOBAL_USER_SCRIPT.contains(&format!("    {} = function", op.name())),
                "{} missing",
                op.name()
            );
        }
        assert!(GLOBAL_USER_SCRIPT.contains("function EvaluateYarnExpression(instruction_list)"));
    }
}

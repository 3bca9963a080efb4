//! Statement tree built from one node's instruction stream.
//!
//! Statements live in an arena owned by [`StatementTree`] and refer to each
//! other through [`StmtId`]. Every block keeps its children in order; the
//! parent link is a plain id. Slot 0 is always the conversation root.

use yarn_data::{Instruction, Opcode};

/// Handle of a statement inside its [`StatementTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(usize);

impl StmtId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Coarse statement type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    Basic,
    Conversation,
    IfBlock,
    IfClause,
    ShortcutOptionList,
    ShortcutOption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfClauseType {
    If,
    ElseIf,
    Else,
}

impl IfClauseType {
    pub fn as_str(self) -> &'static str {
        match self {
            IfClauseType::If => "If",
            IfClauseType::ElseIf => "ElseIf",
            IfClauseType::Else => "Else",
        }
    }
}

/// Roll-up of what a block's descendants contain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentFlags {
    pub options: bool,
    pub commands: bool,
    pub dialogue: bool,
    pub start_new_conversation: bool,
}

impl ContentFlags {
    fn from_opcode(opcode: Opcode) -> Self {
        Self {
            options: opcode == Opcode::AddOption,
            commands: opcode == Opcode::RunCommand,
            dialogue: opcode == Opcode::RunLine,
            start_new_conversation: opcode == Opcode::RunNode,
        }
    }

    fn merge(&mut self, other: ContentFlags) {
        self.options |= other.options;
        self.commands |= other.commands;
        self.dialogue |= other.dialogue;
        self.start_new_conversation |= other.start_new_conversation;
    }
}

/// A run of instructions ending in (at most) one terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicStatement {
    instructions: Vec<Instruction>,
    main_index: usize,
    pub branch_label: Option<String>,
    /// True when any push feeds the statement, i.e. some operands are computed at runtime.
    pub has_arguments: bool,
    /// Gating flag of a cross-conversation option offered from inside a nested block.
    pub option_conditions_variable: Option<String>,
    /// Sequence set by a following `<<sequence ...>>` command.
    pub sequence: Option<String>,
}

impl BasicStatement {
    /// Returns `None` for an empty instruction run.
    pub fn new(instructions: Vec<Instruction>) -> Option<Self> {
        let last = instructions.last()?;
        let main_index = instructions
            .iter()
            .position(|i| i.opcode == Opcode::StoreVariable)
            .unwrap_or(instructions.len() - 1);
        let branch_label = match last.opcode {
            Opcode::JumpIfFalse | Opcode::JumpTo | Opcode::RunNode => last.string_operand(0),
            Opcode::AddOption => last.string_operand(1),
            _ => None,
        }
        .map(str::to_string);
        let has_arguments = instructions.iter().any(|i| i.opcode.is_push());
        Some(Self {
            instructions,
            main_index,
            branch_label,
            has_arguments,
            option_conditions_variable: None,
            sequence: None,
        })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The store-variable instruction when present, otherwise the last instruction.
    pub fn main_instruction(&self) -> &Instruction {
        &self.instructions[self.main_index]
    }

    pub fn last_instruction(&self) -> &Instruction {
        &self.instructions[self.instructions.len() - 1]
    }

    pub fn main_opcode(&self) -> Opcode {
        self.main_instruction().opcode
    }

    pub fn last_opcode(&self) -> Opcode {
        self.last_instruction().opcode
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Data shared by every block variant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub statements: Vec<StmtId>,
    pub entrance_label: Option<String>,
    pub exit_label: Option<String>,
    pub flags: ContentFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBlock {
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfClause {
    pub block: Block,
    pub clause_type: IfClauseType,
    /// The jump-if-false statement guarding the clause; never a body child.
    pub conditions: Option<StmtId>,
    /// Label the conditions jump to when false.
    pub jump_if_false_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShortcutOptionList {
    pub block: Block,
    pub options: Vec<StmtId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShortcutOption {
    pub block: Block,
    /// The add-option statement offering this option.
    pub option: StmtId,
    pub conditions: Option<StmtId>,
}

/// Closed set of statement variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Basic(BasicStatement),
    Conversation(Block),
    IfBlock(IfBlock),
    IfClause(IfClause),
    ShortcutOptionList(ShortcutOptionList),
    ShortcutOption(ShortcutOption),
}

impl StatementKind {
    pub fn statement_type(&self) -> StatementType {
        match self {
            StatementKind::Basic(_) => StatementType::Basic,
            StatementKind::Conversation(_) => StatementType::Conversation,
            StatementKind::IfBlock(_) => StatementType::IfBlock,
            StatementKind::IfClause(_) => StatementType::IfClause,
            StatementKind::ShortcutOptionList(_) => StatementType::ShortcutOptionList,
            StatementKind::ShortcutOption(_) => StatementType::ShortcutOption,
        }
    }

    pub fn block(&self) -> Option<&Block> {
        match self {
            StatementKind::Basic(_) => None,
            StatementKind::Conversation(block) => Some(block),
            StatementKind::IfBlock(b) => Some(&b.block),
            StatementKind::IfClause(c) => Some(&c.block),
            StatementKind::ShortcutOptionList(l) => Some(&l.block),
            StatementKind::ShortcutOption(o) => Some(&o.block),
        }
    }

    fn block_mut(&mut self) -> Option<&mut Block> {
        match self {
            StatementKind::Basic(_) => None,
            StatementKind::Conversation(block) => Some(block),
            StatementKind::IfBlock(b) => Some(&mut b.block),
            StatementKind::IfClause(c) => Some(&mut c.block),
            StatementKind::ShortcutOptionList(l) => Some(&mut l.block),
            StatementKind::ShortcutOption(o) => Some(&mut o.block),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub parent: Option<StmtId>,
    /// Jump label marking the statement's first instruction.
    pub label: Option<String>,
    pub kind: StatementKind,
}

/// Arena of statements for one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementTree {
    statements: Vec<Statement>,
}

impl Default for StatementTree {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementTree {
    pub fn new() -> Self {
        Self {
            statements: vec![Statement {
                parent: None,
                label: None,
                kind: StatementKind::Conversation(Block::default()),
            }],
        }
    }

    pub fn root(&self) -> StmtId {
        StmtId(0)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn get(&self, id: StmtId) -> &Statement {
        &self.statements[id.0]
    }

    pub fn kind(&self, id: StmtId) -> &StatementKind {
        &self.get(id).kind
    }

    pub fn parent(&self, id: StmtId) -> Option<StmtId> {
        self.get(id).parent
    }

    pub fn basic(&self, id: StmtId) -> Option<&BasicStatement> {
        match self.kind(id) {
            StatementKind::Basic(stmt) => Some(stmt),
            _ => None,
        }
    }

    pub(crate) fn basic_mut(&mut self, id: StmtId) -> Option<&mut BasicStatement> {
        match &mut self.statements[id.0].kind {
            StatementKind::Basic(stmt) => Some(stmt),
            _ => None,
        }
    }

    pub fn block(&self, id: StmtId) -> Option<&Block> {
        self.kind(id).block()
    }

    pub(crate) fn block_mut(&mut self, id: StmtId) -> Option<&mut Block> {
        self.statements[id.0].kind.block_mut()
    }

    /// Children of a block in order; empty for basic statements.
    pub fn children(&self, id: StmtId) -> &[StmtId] {
        self.block(id).map_or(&[], |b| b.statements.as_slice())
    }

    pub fn last_child(&self, id: StmtId) -> Option<StmtId> {
        self.children(id).last().copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = StmtId> + '_ {
        (0..self.statements.len()).map(StmtId)
    }

    /// Clauses of an if-block in order.
    pub fn clauses(&self, if_block: StmtId) -> impl Iterator<Item = (StmtId, &IfClause)> {
        self.children(if_block).iter().filter_map(|id| match self.kind(*id) {
            StatementKind::IfClause(clause) => Some((*id, clause)),
            _ => None,
        })
    }

    pub fn has_else(&self, if_block: StmtId) -> bool {
        self.clauses(if_block)
            .any(|(_, clause)| clause.clause_type == IfClauseType::Else)
    }

    /// Store a statement without attaching it to any block.
    pub(crate) fn alloc(&mut self, label: Option<String>, kind: StatementKind) -> StmtId {
        self.statements.push(Statement {
            parent: None,
            label,
            kind,
        });
        StmtId(self.statements.len() - 1)
    }

    /// Attach `child` to `parent` and roll its content flags up to every ancestor.
    ///
    /// An if-clause receiving its first statement classifies itself: a
    /// jump-if-false statement becomes the clause's conditions instead of a body
    /// child, making the clause `If` (first in its block) or `ElseIf`. A clause
    /// whose first statement is anything else is an `Else`.
    pub(crate) fn add_statement(&mut self, parent: StmtId, child: StmtId) {
        if self.absorb_clause_conditions(parent, child) {
            return;
        }

        self.statements[child.0].parent = Some(parent);
        if let Some(block) = self.block_mut(parent) {
            block.statements.push(child);
        }
        let child_is_option = matches!(self.kind(child), StatementKind::ShortcutOption(_));
        if let StatementKind::ShortcutOptionList(list) = &mut self.statements[parent.0].kind {
            if child_is_option {
                list.options.push(child);
            }
        }

        let flags = match self.kind(child) {
            StatementKind::Basic(stmt) => ContentFlags::from_opcode(stmt.last_opcode()),
            other => other.block().map(|b| b.flags).unwrap_or_default(),
        };
        let mut ancestor = Some(parent);
        while let Some(id) = ancestor {
            if let Some(block) = self.block_mut(id) {
                block.flags.merge(flags);
            }
            ancestor = self.parent(id);
        }
    }

    fn absorb_clause_conditions(&mut self, parent: StmtId, child: StmtId) -> bool {
        let is_first = match self.kind(parent) {
            StatementKind::IfClause(clause) => clause.block.statements.is_empty() && clause.conditions.is_none(),
            _ => return false,
        };
        if !is_first {
            return false;
        }
        let conditional_target = match self.kind(child) {
            StatementKind::Basic(stmt) if stmt.last_opcode() == Opcode::JumpIfFalse => Some(stmt.branch_label.clone()),
            _ => None,
        };
        let position = self
            .parent(parent)
            .map_or(0, |if_block| self.children(if_block).len());

        let StatementKind::IfClause(clause) = &mut self.statements[parent.0].kind else {
            return false;
        };
        match conditional_target {
            Some(target) => {
                clause.clause_type = if position > 1 { IfClauseType::ElseIf } else { IfClauseType::If };
                clause.conditions = Some(child);
                clause.jump_if_false_label = target;
                self.statements[child.0].parent = Some(parent);
                true
            },
            None => {
                clause.clause_type = IfClauseType::Else;
                false
            },
        }
    }

    pub(crate) fn create_if_block(&mut self, parent: StmtId, exit_label: String) -> StmtId {
        let id = self.alloc(
            None,
            StatementKind::IfBlock(IfBlock {
                block: Block {
                    exit_label: Some(exit_label),
                    ..Block::default()
                },
            }),
        );
        self.add_statement(parent, id);
        id
    }

    /// Open a new clause at the end of `if_block`. Callers check [`Self::has_else`] first.
    pub(crate) fn create_if_clause(&mut self, if_block: StmtId) -> StmtId {
        let id = self.alloc(
            None,
            StatementKind::IfClause(IfClause {
                block: Block::default(),
                clause_type: IfClauseType::Else,
                conditions: None,
                jump_if_false_label: None,
            }),
        );
        self.add_statement(if_block, id);
        id
    }

    pub(crate) fn create_shortcut_option_list(&mut self, parent: StmtId) -> StmtId {
        let id = self.alloc(
            None,
            StatementKind::ShortcutOptionList(ShortcutOptionList {
                block: Block::default(),
                options: Vec::new(),
            }),
        );
        self.add_statement(parent, id);
        id
    }

    /// Add an option to `list`. Its entrance label is the add-option's destination.
    pub(crate) fn create_shortcut_option(&mut self, list: StmtId, option: StmtId, conditions: Option<StmtId>) -> StmtId {
        let entrance_label = self.basic(option).and_then(|s| s.branch_label.clone());
        let id = self.alloc(
            None,
            StatementKind::ShortcutOption(ShortcutOption {
                block: Block {
                    entrance_label,
                    ..Block::default()
                },
                option,
                conditions,
            }),
        );
        self.statements[option.0].parent = Some(id);
        if let Some(conditions) = conditions {
            self.statements[conditions.0].parent = Some(id);
        }
        self.add_statement(list, id);
        id
    }

    /// Every id in `id`'s subtree, parents before children.
    pub fn descendants(&self, id: StmtId) -> Vec<StmtId> {
        let mut out = Vec::new();
        let mut work = vec![id];
        while let Some(next) = work.pop() {
            out.push(next);
            work.extend(self.children(next).iter().rev());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(instructions: Vec<Instruction>) -> StatementKind {
        StatementKind::Basic(BasicStatement::new(instructions).expect("non-empty"))
    }

    #[test]
    fn main_instruction_prefers_store_variable() {
        let stmt = BasicStatement::new(vec![
            Instruction::push_float(5.0),
            Instruction::store_variable("$gold"),
            Instruction::bare(Opcode::Pop),
        ])
        .expect("non-empty");
        assert_eq!(stmt.main_opcode(), Opcode::StoreVariable);
        assert_eq!(stmt.last_opcode(), Opcode::Pop);
        assert!(stmt.has_arguments);
        assert!(BasicStatement::new(Vec::new()).is_none());
    }

    #[test]
    fn branch_labels_by_opcode() {
        let label = |inst: Instruction| BasicStatement::new(vec![inst]).and_then(|s| s.branch_label);
        assert_eq!(label(Instruction::jump_to("L1")).as_deref(), Some("L1"));
        assert_eq!(label(Instruction::jump_if_false("L2")).as_deref(), Some("L2"));
        assert_eq!(label(Instruction::run_node("Shop")).as_deref(), Some("Shop"));
        assert_eq!(label(Instruction::bare(Opcode::RunNode)), None);
        assert_eq!(label(Instruction::add_option("line:1", "opt")).as_deref(), Some("opt"));
        assert_eq!(label(Instruction::run_line("line:2")), None);
    }

    #[test]
    fn flags_roll_up_to_every_ancestor() {
        let mut tree = StatementTree::new();
        let root = tree.root();
        let if_block = tree.create_if_block(root, "endif".into());
        let clause = tree.create_if_clause(if_block);
        let cond = tree.alloc(
            None,
            basic(vec![Instruction::push_variable("$a"), Instruction::jump_if_false("skip")]),
        );
        tree.add_statement(clause, cond);
        let line = tree.alloc(None, basic(vec![Instruction::run_line("line:1")]));
        tree.add_statement(clause, line);

        for id in [clause, if_block, root] {
            let flags = tree.block(id).expect("block").flags;
            assert!(flags.dialogue, "{id:?} should contain dialogue");
            assert!(!flags.options);
        }
        let StatementKind::IfClause(c) = tree.kind(clause) else {
            panic!("expected clause");
        };
        assert_eq!(c.clause_type, IfClauseType::If);
        assert_eq!(c.conditions, Some(cond));
        assert_eq!(c.jump_if_false_label.as_deref(), Some("skip"));
        assert_eq!(tree.children(clause), &[line]);
    }

    #[test]
    fn clause_types_follow_position_and_first_statement() {
        let mut tree = StatementTree::new();
        let root = tree.root();
        let if_block = tree.create_if_block(root, "endif".into());
        for first in [
            vec![Instruction::push_bool(true), Instruction::jump_if_false("a")],
            vec![Instruction::push_bool(false), Instruction::jump_if_false("b")],
            vec![Instruction::run_line("line:3")],
        ] {
            let clause = tree.create_if_clause(if_block);
            let stmt = tree.alloc(None, basic(first));
            tree.add_statement(clause, stmt);
        }
        let types: Vec<_> = tree.clauses(if_block).map(|(_, c)| c.clause_type).collect();
        assert_eq!(types, vec![IfClauseType::If, IfClauseType::ElseIf, IfClauseType::Else]);
        assert!(tree.has_else(if_block));
    }

    #[test]
    fn shortcut_options_register_with_their_list() {
        let mut tree = StatementTree::new();
        let root = tree.root();
        let list = tree.create_shortcut_option_list(root);
        let add = tree.alloc(None, basic(vec![Instruction::add_option("line:1", "option_1")]));
        let option = tree.create_shortcut_option(list, add, None);

        let StatementKind::ShortcutOptionList(l) = tree.kind(list) else {
            panic!("expected list");
        };
        assert_eq!(l.options, vec![option]);
        assert_eq!(tree.block(option).and_then(|b| b.entrance_label.as_deref()), Some("option_1"));
        assert_eq!(tree.parent(add), Some(option));
        assert_eq!(tree.descendants(root), vec![root, list, option]);
    }
}

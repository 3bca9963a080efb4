//! Yarn project: the program plus the statement tree rebuilt for every node.
//!
//! The block builder walks each node's instructions once. It keeps a stack of
//! open blocks and a `current` block, and recognizes the shapes the Yarn
//! compiler emits:
//!
//! - `if` chains: a jump-if-false whose target is preceded by a jump-to (the
//!   jump to the chain's exit label). Each clause closes at its false target,
//!   which always holds a pop.
//! - shortcut options: add-option instructions whose destination is a label
//!   inside the node. The list closes at its `Jump`; each option body opens at
//!   its destination label and closes at the list's exit pop.
//! - cross-conversation options: add-option instructions naming another node.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use log::{debug, info, warn};
use regex::Regex;
use yarn_data::{Node, Opcode, Program, StringTable};

use crate::ConvertError;
use crate::classify::classify_statement;
use crate::statement::{BasicStatement, StatementKind, StatementTree, StmtId};
use crate::symbols::SymbolTable;

/// Header fields of one Yarn node (`title`, `actor`, `conversant`, ...).
pub type NodeMetadata = BTreeMap<String, String>;

static SET_SEQUENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^sequence\s+(.*)$").expect("valid sequence pattern"));

/// Argument of a `<<sequence ...>>` pseudo-command, if `text` is one.
pub fn set_sequence_argument(text: &str) -> Option<&str> {
    SET_SEQUENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Prefix of the gating flags allocated for a node's nested options.
pub fn option_conditions_prefix(node: &str) -> String {
    format!("${node}_opt_cond_")
}

/// Two-way jump table of one node.
#[derive(Debug, Clone, Default)]
pub struct LabelMaps {
    by_label: BTreeMap<String, usize>,
    by_index: HashMap<usize, String>,
}

impl LabelMaps {
    pub fn new(node: &Node) -> Self {
        let by_index = node.labels.iter().map(|(label, index)| (*index, label.clone())).collect();
        Self {
            by_label: node.labels.clone(),
            by_index,
        }
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.by_label.get(label).copied()
    }

    pub fn label_at(&self, index: usize) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }
}

/// One node, rebuilt as a statement tree.
#[derive(Debug, Clone)]
pub struct ConversationNode {
    pub name: String,
    pub metadata: NodeMetadata,
    pub tree: StatementTree,
    /// Cross-conversation options, in program order.
    pub options: Vec<StmtId>,
    pub labels: LabelMaps,
    /// Statement marked by each label.
    pub label_statements: HashMap<String, StmtId>,
}

impl ConversationNode {
    pub fn root(&self) -> StmtId {
        self.tree.root()
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// A compiled program with its string table, symbols and rebuilt nodes.
#[derive(Debug, Clone)]
pub struct YarnProject {
    pub program: Program,
    pub string_table: StringTable,
    pub symbols: SymbolTable,
    pub nodes: BTreeMap<String, ConversationNode>,
}

impl YarnProject {
    /// Build the statement tree of every node.
    ///
    /// `metadata` is keyed by node title; nodes without an entry get a
    /// title-only header.
    ///
    /// # Errors
    /// Returns the first structural violation found in any node.
    pub fn new(
        program: Program,
        string_table: StringTable,
        mut metadata: BTreeMap<String, NodeMetadata>,
    ) -> Result<Self, ConvertError> {
        let mut symbols = SymbolTable::default();
        let mut nodes = BTreeMap::new();
        for node in program.nodes.values() {
            let header = metadata.remove(&node.name).unwrap_or_else(|| {
                debug!("node '{}' has no header metadata", node.name);
                NodeMetadata::from([("title".to_string(), node.name.clone())])
            });
            let built = BlockBuilder::new(node, &program, &mut symbols).build(header)?;
            nodes.insert(node.name.clone(), built);
        }
        info!(
            "parsed {} node(s), {} variable(s), {} command(s)",
            nodes.len(),
            symbols.variables.len(),
            symbols.commands.len()
        );
        Ok(Self {
            program,
            string_table,
            symbols,
            nodes,
        })
    }

    pub fn node(&self, name: &str) -> Option<&ConversationNode> {
        self.nodes.get(name)
    }
}

/// What a jump-if-false guards, judged by the instruction just before its target.
enum ConditionalBlock {
    ShortcutOption,
    IfClause { exit_label: String },
}

struct BlockBuilder<'a> {
    node: &'a Node,
    program: &'a Program,
    symbols: &'a mut SymbolTable,
    labels: LabelMaps,
    tree: StatementTree,
    stack: Vec<StmtId>,
    current: StmtId,
    /// Shortcut options waiting for their body, by destination label.
    pending_options: HashMap<String, StmtId>,
    /// If-blocks by exit label.
    if_blocks: HashMap<String, StmtId>,
    label_statements: HashMap<String, StmtId>,
    options: Vec<StmtId>,
    previous: Option<StmtId>,
}

impl<'a> BlockBuilder<'a> {
    fn new(node: &'a Node, program: &'a Program, symbols: &'a mut SymbolTable) -> Self {
        let tree = StatementTree::new();
        let current = tree.root();
        Self {
            node,
            program,
            symbols,
            labels: LabelMaps::new(node),
            tree,
            stack: Vec::new(),
            current,
            pending_options: HashMap::new(),
            if_blocks: HashMap::new(),
            label_statements: HashMap::new(),
            options: Vec::new(),
            previous: None,
        }
    }

    fn build(mut self, metadata: NodeMetadata) -> Result<ConversationNode, ConvertError> {
        let count = self.node.instructions.len();
        let mut index = 0;
        while index < count {
            index = self.step(index)?;
        }

        let root = self.tree.root();
        if !self.stack.is_empty() || self.current != root {
            return Err(ConvertError::UnbalancedBlocks {
                node: self.node.name.clone(),
                open: self.stack.len() + usize::from(self.current != root),
            });
        }
        if let Some(label) = self.pending_options.keys().min() {
            return Err(ConvertError::MissingShortcutDestination {
                node: self.node.name.clone(),
                label: label.clone(),
            });
        }

        debug!(
            "node '{}': {} statement(s), {} cross-conversation option(s)",
            self.node.name,
            self.tree.len(),
            self.options.len()
        );
        Ok(ConversationNode {
            name: self.node.name.clone(),
            metadata,
            tree: self.tree,
            options: self.options,
            labels: self.labels,
            label_statements: self.label_statements,
        })
    }

    /// Handle the statement at `index`; returns the index of the next one.
    fn step(&mut self, index: usize) -> Result<usize, ConvertError> {
        let stmt = self.classify(index)?;
        let opcode = stmt.last_opcode();
        let branch_label = stmt.branch_label.clone();
        let len = stmt.len();
        let label = self.labels.label_at(index).map(str::to_string);
        let id = self.store(index, stmt);
        let next = index + len;

        if let Some(label) = &label {
            if let Some(option) = self.pending_options.remove(label) {
                self.enter_shortcut_option(option, index)?;
            } else if let Some(false_target) = self.current_clause_false_target() {
                if false_target.as_deref() == Some(label.as_str()) {
                    self.expect_opcode(index, opcode, Opcode::Pop, "pop closing an if clause")?;
                    self.close_if_clause(next)?;
                    self.previous = None;
                    return Ok(next);
                } else if self.current_if_block_exit().as_deref() == Some(label.as_str()) {
                    self.current = self.pop_block()?;
                }
            }
        }

        match opcode {
            Opcode::JumpIfFalse => {
                let target = self.required(branch_label, index, opcode)?;
                match self.conditional_block(&target)? {
                    ConditionalBlock::ShortcutOption => return self.conditional_shortcut_option(id, next),
                    ConditionalBlock::IfClause { exit_label } => self.open_if_clause(id, exit_label, index)?,
                }
            },
            Opcode::AddOption => {
                let target = self.required(branch_label, index, opcode)?;
                if self.program.contains_node(&target) {
                    self.tree.add_statement(self.current, id);
                    if self.current != self.tree.root() {
                        let flag = self
                            .symbols
                            .create_local_variable(&option_conditions_prefix(&self.node.name));
                        if let Some(stmt) = self.tree.basic_mut(id) {
                            stmt.option_conditions_variable = Some(flag);
                        }
                    }
                    self.options.push(id);
                } else {
                    let list = self.current_option_list();
                    let option = self.tree.create_shortcut_option(list, id, None);
                    self.pending_options.insert(target, option);
                }
            },
            Opcode::ShowOptions if self.current_is_option_list() => {
                self.tree.add_statement(self.current, id);
            },
            Opcode::Jump if self.current_is_option_list() => {
                self.tree.add_statement(self.current, id);
                self.current = self.pop_block()?;
            },
            Opcode::Pop if self.current_is_shortcut_option() => {
                if len == 1 {
                    let list = self.parent_list(self.current)?;
                    self.record_list_exit(list, label)?;
                    self.current = self.pop_block()?;
                } else {
                    self.tree.add_statement(self.current, id);
                }
            },
            Opcode::Stop => {
                if next < self.node.instructions.len() {
                    self.tree.add_statement(self.current, id);
                }
            },
            Opcode::RunCommand => {
                let text = self.tree.basic(id).and_then(|s| s.last_instruction().string_operand(0));
                match text.and_then(set_sequence_argument).map(str::to_string) {
                    Some(sequence) => self.attach_sequence(sequence),
                    None => self.tree.add_statement(self.current, id),
                }
            },
            _ => self.tree.add_statement(self.current, id),
        }

        self.previous = Some(id);
        Ok(next)
    }

    fn classify(&mut self, index: usize) -> Result<BasicStatement, ConvertError> {
        classify_statement(self.node, index, self.symbols)?.ok_or_else(|| ConvertError::MissingStatement {
            node: self.node.name.clone(),
            index,
        })
    }

    /// Put a classified statement in the arena and index it by its label.
    fn store(&mut self, index: usize, stmt: BasicStatement) -> StmtId {
        let label = self.labels.label_at(index).map(str::to_string);
        let id = self.tree.alloc(label.clone(), StatementKind::Basic(stmt));
        if let Some(label) = label {
            self.label_statements.insert(label, id);
        }
        id
    }

    fn required(&self, value: Option<String>, index: usize, opcode: Opcode) -> Result<String, ConvertError> {
        value.ok_or_else(|| ConvertError::MissingOperand {
            node: self.node.name.clone(),
            index,
            opcode,
            operand: if opcode == Opcode::AddOption { 1 } else { 0 },
        })
    }

    fn expect_opcode(
        &self,
        index: usize,
        found: Opcode,
        wanted: Opcode,
        expected: &'static str,
    ) -> Result<(), ConvertError> {
        if found == wanted {
            Ok(())
        } else {
            Err(ConvertError::UnexpectedInstruction {
                node: self.node.name.clone(),
                index,
                expected,
                found,
            })
        }
    }

    fn pop_block(&mut self) -> Result<StmtId, ConvertError> {
        self.stack.pop().ok_or_else(|| ConvertError::UnbalancedBlocks {
            node: self.node.name.clone(),
            open: 0,
        })
    }

    fn current_is_option_list(&self) -> bool {
        matches!(self.tree.kind(self.current), StatementKind::ShortcutOptionList(_))
    }

    fn current_is_shortcut_option(&self) -> bool {
        matches!(self.tree.kind(self.current), StatementKind::ShortcutOption(_))
    }

    /// `Some(false target)` while an if clause is current.
    fn current_clause_false_target(&self) -> Option<Option<String>> {
        match self.tree.kind(self.current) {
            StatementKind::IfClause(clause) => Some(clause.jump_if_false_label.clone()),
            _ => None,
        }
    }

    fn current_if_block_exit(&self) -> Option<String> {
        self.tree
            .parent(self.current)
            .and_then(|if_block| self.tree.block(if_block))
            .and_then(|b| b.exit_label.clone())
    }

    /// Decide what a jump-if-false guards from the instruction before its target.
    fn conditional_block(&self, target: &str) -> Result<ConditionalBlock, ConvertError> {
        let missing = || ConvertError::MissingLabel {
            node: self.node.name.clone(),
            label: target.to_string(),
        };
        let target_index = self.labels.index_of(target).ok_or_else(missing)?;
        let before = target_index.checked_sub(1).ok_or_else(missing)?;
        let instruction = self.node.instructions.get(before).ok_or_else(missing)?;
        match instruction.opcode {
            Opcode::AddOption => Ok(ConditionalBlock::ShortcutOption),
            Opcode::JumpTo => {
                let exit_label = instruction
                    .string_operand(0)
                    .ok_or_else(|| ConvertError::MissingOperand {
                        node: self.node.name.clone(),
                        index: before,
                        opcode: Opcode::JumpTo,
                        operand: 0,
                    })?
                    .to_string();
                Ok(ConditionalBlock::IfClause { exit_label })
            },
            found => Err(ConvertError::UnexpectedInstruction {
                node: self.node.name.clone(),
                index: before,
                expected: "add-option or jump-to before a jump-if-false target",
                found,
            }),
        }
    }

    /// The list currently being filled, or a new one opened under the current block.
    fn current_option_list(&mut self) -> StmtId {
        if self.current_is_option_list() {
            return self.current;
        }
        let list = self.tree.create_shortcut_option_list(self.current);
        self.stack.push(self.current);
        self.current = list;
        list
    }

    fn parent_list(&self, option: StmtId) -> Result<StmtId, ConvertError> {
        self.tree
            .parent(option)
            .filter(|p| matches!(self.tree.kind(*p), StatementKind::ShortcutOptionList(_)))
            .ok_or_else(|| ConvertError::UnbalancedBlocks {
                node: self.node.name.clone(),
                open: self.stack.len(),
            })
    }

    /// Set the list's exit label the first time it is seen; later sightings must agree.
    fn record_list_exit(&mut self, list: StmtId, label: Option<String>) -> Result<(), ConvertError> {
        let node = self.node.name.clone();
        let Some(block) = self.tree.block_mut(list) else {
            return Ok(());
        };
        match block.exit_label.clone() {
            None => block.exit_label = label,
            Some(expected) if label.as_deref() == Some(expected.as_str()) => {},
            Some(expected) => {
                return Err(ConvertError::ExitLabelMismatch {
                    node,
                    expected,
                    found: label.unwrap_or_default(),
                });
            },
        }
        Ok(())
    }

    /// The body of a pending shortcut option starts here.
    fn enter_shortcut_option(&mut self, option: StmtId, index: usize) -> Result<(), ConvertError> {
        let sibling = self.current_is_shortcut_option() && self.tree.parent(self.current) == self.tree.parent(option);
        if sibling {
            // The previous option's body ends with the jump to the list exit.
            let last = self.tree.last_child(self.current).and_then(|id| self.tree.basic(id));
            let exit = match last {
                Some(stmt) if stmt.last_opcode() == Opcode::JumpTo => stmt.branch_label.clone(),
                other => {
                    return Err(ConvertError::UnexpectedInstruction {
                        node: self.node.name.clone(),
                        index,
                        expected: "jump-to ending the previous shortcut option",
                        found: other.map_or(Opcode::Stop, BasicStatement::last_opcode),
                    });
                },
            };
            let list = self.parent_list(self.current)?;
            self.record_list_exit(list, exit)?;
        } else {
            self.stack.push(self.current);
        }
        self.current = option;
        Ok(())
    }

    /// A jump-if-false guarding an if clause: open the if-block the first time its exit is seen.
    ///
    /// Later conditions of the same block must land on the fresh clause opened
    /// at the previous clause's false target.
    fn open_if_clause(&mut self, conditions: StmtId, exit_label: String, index: usize) -> Result<(), ConvertError> {
        let Some(&if_block) = self.if_blocks.get(&exit_label) else {
            self.stack.push(self.current);
            let if_block = self.tree.create_if_block(self.current, exit_label.clone());
            self.if_blocks.insert(exit_label, if_block);
            self.current = self.tree.create_if_clause(if_block);
            self.tree.add_statement(self.current, conditions);
            return Ok(());
        };
        let in_block = self.tree.parent(self.current) == Some(if_block);
        match self.tree.kind(self.current) {
            StatementKind::IfClause(clause) if in_block && clause.conditions.is_none() => {
                if !clause.block.statements.is_empty() {
                    return Err(ConvertError::ElseNotLast {
                        node: self.node.name.clone(),
                        exit_label,
                    });
                }
            },
            _ => {
                return Err(ConvertError::UnexpectedInstruction {
                    node: self.node.name.clone(),
                    index,
                    expected: "conditions of an open if clause",
                    found: Opcode::JumpIfFalse,
                });
            },
        }
        self.tree.add_statement(self.current, conditions);
        Ok(())
    }

    /// The clause ended at its false target. Open the next clause unless the
    /// following statement is the if-block's exit.
    fn close_if_clause(&mut self, next: usize) -> Result<(), ConvertError> {
        let exit_label = self.current_if_block_exit();
        let if_block = self.tree.parent(self.current);
        self.current = self.pop_block()?;

        let at_exit = next >= self.node.instructions.len() || self.labels.label_at(next) == exit_label.as_deref();
        if at_exit {
            return Ok(());
        }
        let Some(if_block) = if_block else {
            return Ok(());
        };
        if self.tree.has_else(if_block) {
            return Err(ConvertError::ElseNotLast {
                node: self.node.name.clone(),
                exit_label: exit_label.unwrap_or_default(),
            });
        }
        self.stack.push(self.current);
        self.current = self.tree.create_if_clause(if_block);
        Ok(())
    }

    /// `jump-if-false`, `add-option`, `pop`: an option offered only when its condition holds.
    fn conditional_shortcut_option(&mut self, conditions: StmtId, option_index: usize) -> Result<usize, ConvertError> {
        let list = self.current_option_list();

        let option_stmt = self.classify(option_index)?;
        self.expect_opcode(
            option_index,
            option_stmt.last_opcode(),
            Opcode::AddOption,
            "add-option after option conditions",
        )?;
        let destination = self.required(option_stmt.branch_label.clone(), option_index, Opcode::AddOption)?;
        let pop_index = option_index + option_stmt.len();
        let option_id = self.store(option_index, option_stmt);

        let pop_stmt = self.classify(pop_index)?;
        self.expect_opcode(
            pop_index,
            pop_stmt.last_opcode(),
            Opcode::Pop,
            "pop after a conditional option",
        )?;
        let next = pop_index + pop_stmt.len();
        self.store(pop_index, pop_stmt);

        let option = self.tree.create_shortcut_option(list, option_id, Some(conditions));
        self.pending_options.insert(destination, option);
        self.previous = None;
        Ok(next)
    }

    /// Hand a `<<sequence ...>>` argument to the statement before it.
    fn attach_sequence(&mut self, sequence: String) {
        match self.previous.and_then(|id| self.tree.basic_mut(id)) {
            Some(stmt) => stmt.sequence = Some(sequence),
            None => warn!(
                "node '{}': sequence '{sequence}' has no preceding statement to attach to",
                self.node.name
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::IfClauseType;
    use yarn_data::Instruction;

    fn program(nodes: Vec<(&str, Vec<Instruction>, Vec<(&str, usize)>)>) -> Program {
        let mut program = Program::default();
        for (name, instructions, labels) in nodes {
            program.nodes.insert(
                name.to_string(),
                Node {
                    name: name.to_string(),
                    instructions,
                    labels: labels.into_iter().map(|(l, i)| (l.to_string(), i)).collect(),
                    tags: Vec::new(),
                },
            );
        }
        program
    }

    fn project(program: Program) -> YarnProject {
        YarnProject::new(program, StringTable::new(), BTreeMap::new()).expect("project builds")
    }

    fn pop() -> Instruction {
        Instruction::bare(Opcode::Pop)
    }

    fn stop() -> Instruction {
        Instruction::bare(Opcode::Stop)
    }

    #[test]
    fn linear_node_has_no_blocks_and_drops_trailing_stop() {
        let project = project(program(vec![(
            "Start",
            vec![Instruction::run_line("line:1"), Instruction::run_line("line:2"), stop()],
            vec![],
        )]));
        let node = project.node("Start").expect("node");
        assert_eq!(node.tree.children(node.root()).len(), 2);
        assert!(
            node.tree
                .ids()
                .all(|id| matches!(node.tree.kind(id), StatementKind::Basic(_) | StatementKind::Conversation(_)))
        );
        assert!(node.tree.block(node.root()).expect("root").flags.dialogue);
    }

    #[test]
    fn if_elseif_else_builds_three_typed_clauses() {
        let instructions = vec![
            Instruction::push_variable("$a"),
            Instruction::jump_if_false("skip1"),
            Instruction::run_line("line:a"),
            Instruction::jump_to("endif"),
            pop(),
            Instruction::push_variable("$b"),
            Instruction::jump_if_false("skip2"),
            Instruction::run_line("line:b"),
            Instruction::jump_to("endif"),
            pop(),
            Instruction::run_line("line:c"),
            Instruction::jump_to("endif"),
            Instruction::run_line("line:d"),
            stop(),
        ];
        let labels = vec![("skip1", 4), ("skip2", 9), ("endif", 12)];
        let project = project(program(vec![("Start", instructions, labels)]));
        let node = project.node("Start").expect("node");
        let root_children = node.tree.children(node.root());
        assert_eq!(root_children.len(), 2, "if block then line d");

        let if_block = root_children[0];
        let clauses: Vec<_> = node.tree.clauses(if_block).map(|(_, c)| c.clone()).collect();
        let types: Vec<_> = clauses.iter().map(|c| c.clause_type).collect();
        assert_eq!(types, vec![IfClauseType::If, IfClauseType::ElseIf, IfClauseType::Else]);
        assert!(clauses[0].conditions.is_some());
        assert!(clauses[1].conditions.is_some());
        assert!(clauses[2].conditions.is_none());
        for clause in &clauses {
            assert_eq!(clause.block.statements.len(), 2, "run line + jump to exit");
        }
        assert!(node.label_statements.contains_key("endif"));
    }

    #[test]
    fn if_without_else_closes_at_exit_label() {
        let instructions = vec![
            Instruction::push_variable("$a"),
            Instruction::jump_if_false("skip1"),
            Instruction::run_line("line:a"),
            Instruction::jump_to("endif"),
            pop(),
            Instruction::run_line("line:d"),
            stop(),
        ];
        let project = project(program(vec![("Start", instructions, vec![("skip1", 4), ("endif", 5)])]));
        let node = project.node("Start").expect("node");
        let if_block = node.tree.children(node.root())[0];
        assert_eq!(node.tree.clauses(if_block).count(), 1);
        assert!(!node.tree.has_else(if_block));
    }

    fn shortcut_instructions() -> (Vec<Instruction>, Vec<(&'static str, usize)>) {
        let instructions = vec![
            Instruction::add_option("line:opt1", "option_1"),
            Instruction::push_variable("$c"),
            Instruction::jump_if_false("conditional_1"),
            Instruction::add_option("line:opt2", "option_2"),
            pop(),
            Instruction::bare(Opcode::ShowOptions),
            Instruction::bare(Opcode::Jump),
            Instruction::run_line("line:a"),
            Instruction::jump_to("group_end"),
            Instruction::run_line("line:b"),
            Instruction::jump_to("group_end"),
            pop(),
            stop(),
        ];
        let labels = vec![("conditional_1", 4), ("option_1", 7), ("option_2", 9), ("group_end", 11)];
        (instructions, labels)
    }

    #[test]
    fn shortcut_options_open_at_destination_and_close_at_group_end() {
        let (instructions, labels) = shortcut_instructions();
        let project = project(program(vec![("Start", instructions, labels)]));
        let node = project.node("Start").expect("node");
        let list = node.tree.children(node.root())[0];
        let StatementKind::ShortcutOptionList(l) = node.tree.kind(list) else {
            panic!("expected option list");
        };
        assert_eq!(l.options.len(), 2);
        assert_eq!(l.block.exit_label.as_deref(), Some("group_end"));
        let conditional: Vec<_> = l
            .options
            .iter()
            .map(|id| match node.tree.kind(*id) {
                StatementKind::ShortcutOption(o) => o.conditions.is_some(),
                _ => panic!("expected option"),
            })
            .collect();
        assert_eq!(conditional, vec![false, true]);
        for option in &l.options {
            assert_eq!(node.tree.children(*option).len(), 2);
        }
        assert!(node.options.is_empty());
    }

    #[test]
    fn nested_if_inside_shortcut_option_composes() {
        let instructions = vec![
            Instruction::add_option("line:opt1", "option_1"),
            Instruction::bare(Opcode::ShowOptions),
            Instruction::bare(Opcode::Jump),
            Instruction::push_variable("$a"),
            Instruction::jump_if_false("skip1"),
            Instruction::run_line("line:a"),
            Instruction::jump_to("endif"),
            pop(),
            Instruction::jump_to("group_end"),
            pop(),
            stop(),
        ];
        let labels = vec![("option_1", 3), ("skip1", 7), ("endif", 8), ("group_end", 9)];
        let project = project(program(vec![("Start", instructions, labels)]));
        let node = project.node("Start").expect("node");
        let list = node.tree.children(node.root())[0];
        let option = node.tree.children(list)[0];
        let body = node.tree.children(option);
        assert_eq!(body.len(), 2, "if block then jump to group end");
        assert!(matches!(node.tree.kind(body[0]), StatementKind::IfBlock(_)));
        assert_eq!(node.tree.parent(body[0]), Some(option));
    }

    #[test]
    fn cross_conversation_option_inside_clause_gets_gating_flag() {
        let instructions = vec![
            Instruction::push_variable("$a"),
            Instruction::jump_if_false("skip1"),
            Instruction::add_option("line:go", "Shop"),
            Instruction::jump_to("endif"),
            pop(),
            Instruction::add_option("line:leave", "Shop"),
            Instruction::bare(Opcode::ShowOptions),
            Instruction::bare(Opcode::RunNode),
        ];
        let labels = vec![("skip1", 4), ("endif", 5)];
        let project = project(program(vec![
            ("Start", instructions, labels),
            ("Shop", vec![Instruction::run_line("line:shop"), stop()], vec![]),
        ]));
        let node = project.node("Start").expect("node");
        assert_eq!(node.options.len(), 2);
        let flags: Vec<_> = node
            .options
            .iter()
            .map(|id| node.tree.basic(*id).and_then(|s| s.option_conditions_variable.clone()))
            .collect();
        assert_eq!(flags, vec![Some("$Start_opt_cond_1".to_string()), None]);
        assert!(node.tree.block(node.root()).expect("root").flags.options);
    }

    #[test]
    fn sequence_command_attaches_to_previous_statement() {
        let instructions = vec![
            Instruction::run_line("line:1"),
            Instruction::run_command("sequence Camera(zoom)"),
            Instruction::run_line("line:2"),
            stop(),
        ];
        let project = project(program(vec![("Start", instructions, vec![])]));
        let node = project.node("Start").expect("node");
        let children = node.tree.children(node.root());
        assert_eq!(children.len(), 2);
        let first = node.tree.basic(children[0]).expect("basic");
        assert_eq!(first.sequence.as_deref(), Some("Camera(zoom)"));
        assert!(!project.symbols.commands.contains_key("sequence"));
    }

    #[test]
    fn sequence_without_preceding_statement_is_dropped() {
        let instructions = vec![
            Instruction::run_command("sequence Fade(in)"),
            Instruction::run_line("line:1"),
            stop(),
        ];
        let project = project(program(vec![("Start", instructions, vec![])]));
        let node = project.node("Start").expect("node");
        let children = node.tree.children(node.root());
        assert_eq!(children.len(), 1, "only the line remains");
        assert_eq!(node.tree.basic(children[0]).expect("basic").sequence, None);
    }

    #[test]
    fn mid_node_stop_is_kept() {
        let instructions = vec![Instruction::run_line("line:1"), stop(), Instruction::run_line("line:2"), stop()];
        let project = project(program(vec![("Start", instructions, vec![])]));
        let node = project.node("Start").expect("node");
        assert_eq!(node.tree.children(node.root()).len(), 3);
    }

    #[test]
    fn jump_if_false_to_unknown_shape_is_fatal() {
        let instructions = vec![
            Instruction::push_variable("$a"),
            Instruction::jump_if_false("skip1"),
            Instruction::run_line("line:a"),
            pop(),
            stop(),
        ];
        let err = YarnProject::new(
            program(vec![("Start", instructions, vec![("skip1", 3)])]),
            StringTable::new(),
            BTreeMap::new(),
        )
        .expect_err("malformed");
        assert!(matches!(
            err,
            ConvertError::UnexpectedInstruction {
                found: Opcode::RunLine,
                ..
            }
        ));
    }

    #[test]
    fn unclosed_block_is_fatal() {
        let instructions = vec![
            Instruction::add_option("line:opt1", "option_1"),
            Instruction::bare(Opcode::ShowOptions),
            Instruction::bare(Opcode::Jump),
            Instruction::run_line("line:a"),
            Instruction::jump_to("group_end"),
        ];
        let err = YarnProject::new(
            program(vec![("Start", instructions, vec![("option_1", 3)])]),
            StringTable::new(),
            BTreeMap::new(),
        )
        .expect_err("option body never closed");
        assert!(matches!(err, ConvertError::UnbalancedBlocks { open: 2, .. }));
    }

    #[test]
    fn unreached_shortcut_destination_is_fatal() {
        let instructions = vec![
            Instruction::add_option("line:opt1", "option_1"),
            Instruction::bare(Opcode::ShowOptions),
            Instruction::bare(Opcode::Jump),
            stop(),
        ];
        let err = YarnProject::new(
            program(vec![("Start", instructions, vec![])]),
            StringTable::new(),
            BTreeMap::new(),
        )
        .expect_err("destination never reached");
        assert!(matches!(err, ConvertError::MissingShortcutDestination { label, .. } if label == "option_1"));
    }

    fn build_error(instructions: Vec<Instruction>, labels: Vec<(&str, usize)>) -> ConvertError {
        YarnProject::new(
            program(vec![("Start", instructions, labels)]),
            StringTable::new(),
            BTreeMap::new(),
        )
        .expect_err("malformed node")
    }

    #[test]
    fn options_exiting_to_different_labels_are_fatal() {
        let instructions = vec![
            Instruction::add_option("line:opt1", "option_1"),
            Instruction::add_option("line:opt2", "option_2"),
            Instruction::bare(Opcode::ShowOptions),
            Instruction::bare(Opcode::Jump),
            Instruction::run_line("line:a"),
            Instruction::jump_to("end_a"),
            Instruction::run_line("line:b"),
            Instruction::jump_to("end_b"),
            pop(),
            stop(),
        ];
        let labels = vec![("option_1", 4), ("option_2", 6), ("end_b", 8), ("end_a", 9)];
        let err = build_error(instructions, labels);
        assert!(matches!(
            err,
            ConvertError::ExitLabelMismatch { expected, found, .. } if expected == "end_a" && found == "end_b"
        ));
    }

    #[test]
    fn option_body_without_jump_to_exit_is_fatal() {
        let instructions = vec![
            Instruction::add_option("line:opt1", "option_1"),
            Instruction::add_option("line:opt2", "option_2"),
            Instruction::bare(Opcode::ShowOptions),
            Instruction::bare(Opcode::Jump),
            Instruction::run_line("line:a"),
            Instruction::run_line("line:b"),
            Instruction::jump_to("group_end"),
            pop(),
            stop(),
        ];
        let labels = vec![("option_1", 4), ("option_2", 5), ("group_end", 7)];
        let err = build_error(instructions, labels);
        assert!(matches!(
            err,
            ConvertError::UnexpectedInstruction {
                index: 5,
                found: Opcode::RunLine,
                ..
            }
        ));
    }

    #[test]
    fn clause_false_target_without_pop_is_fatal() {
        let instructions = vec![
            Instruction::push_variable("$a"),
            Instruction::jump_if_false("skip1"),
            Instruction::run_line("line:a"),
            Instruction::jump_to("endif"),
            Instruction::run_line("line:b"),
            stop(),
        ];
        let err = build_error(instructions, vec![("skip1", 4), ("endif", 5)]);
        assert!(matches!(
            err,
            ConvertError::UnexpectedInstruction {
                index: 4,
                found: Opcode::RunLine,
                ..
            }
        ));
    }

    #[test]
    fn jump_if_false_to_unlisted_label_is_fatal() {
        let instructions = vec![
            Instruction::push_variable("$a"),
            Instruction::jump_if_false("nowhere"),
            Instruction::run_line("line:a"),
        ];
        let err = build_error(instructions, vec![]);
        assert!(matches!(err, ConvertError::MissingLabel { label, .. } if label == "nowhere"));
    }

    #[test]
    fn conditions_after_else_body_are_fatal() {
        let instructions = vec![
            Instruction::push_variable("$a"),
            Instruction::jump_if_false("skip1"),
            Instruction::run_line("line:a"),
            Instruction::jump_to("endif"),
            pop(),
            Instruction::run_line("line:b"),
            Instruction::push_variable("$c"),
            Instruction::jump_if_false("skip2"),
            Instruction::run_line("line:c"),
            Instruction::jump_to("endif"),
            pop(),
            Instruction::run_line("line:d"),
        ];
        let labels = vec![("skip1", 4), ("skip2", 10), ("endif", 11)];
        let err = build_error(instructions, labels);
        assert!(matches!(err, ConvertError::ElseNotLast { exit_label, .. } if exit_label == "endif"));
    }

    #[test]
    fn second_conditions_on_a_guarded_clause_are_fatal() {
        let instructions = vec![
            Instruction::push_variable("$a"),
            Instruction::jump_if_false("skip1"),
            Instruction::push_variable("$b"),
            Instruction::jump_if_false("skip1"),
            Instruction::run_line("line:a"),
            Instruction::jump_to("endif"),
            pop(),
            Instruction::run_line("line:b"),
        ];
        let err = build_error(instructions, vec![("skip1", 6), ("endif", 7)]);
        assert!(matches!(
            err,
            ConvertError::UnexpectedInstruction {
                index: 2,
                found: Opcode::JumpIfFalse,
                ..
            }
        ));
    }

    #[test]
    fn set_sequence_argument_requires_whitespace() {
        assert_eq!(set_sequence_argument("sequence  Fade(in) "), Some("Fade(in)"));
        assert_eq!(set_sequence_argument("sequenced thing"), None);
        assert_eq!(set_sequence_argument("seq Fade(in)"), None);
    }
}

//! Dialogue entries for every statement of a node.

use log::{debug, warn};
use yarn_data::{Conversation, DbId, DialogueEntry, Opcode};

use super::YarnConverter;
use crate::ConvertError;
use crate::lua;
use crate::project::ConversationNode;
use crate::statement::{BasicStatement, IfClauseType, StatementKind, StmtId};
use crate::symbols::{RAW_SEQUENCE_COMMAND, WAIT_COMMAND};

/// Entry titles. The culler and the tests find entries by these.
pub mod titles {
    use crate::statement::IfClauseType;

    pub const CONVERSATION_START: &str = "START";
    pub const OPTION_GROUP: &str = "Option Group";
    pub const IF_BLOCK_START: &str = "If Block Start";
    pub const IF_BLOCK_END: &str = "If Block End";
    pub const SHORTCUT_OPTION_LIST_START: &str = "Shortcut Option List Start";
    pub const SHORTCUT_OPTION_LIST_END: &str = "Shortcut Option List End";
    pub const SHORTCUT_OPTION_START: &str = "Shortcut Option Start";
    pub const SHORTCUT_OPTION_END: &str = "Shortcut Option End";
    pub const ADD_OPTION: &str = "Add Option";
    pub const TRIGGER_OPTION: &str = "Trigger Option";
    pub const FORMAT_OPTION: &str = "Format Option";
    pub const RUN_LINE: &str = "Run Line";
    pub const FORMAT_RUN_LINE: &str = "Format RunLine";
    pub const RUN_COMMAND: &str = "Run Command";
    pub const UNSUPPORTED_WAIT: &str = "Unsupported: Wait Command";
    pub const SEQUENCE: &str = "Sequence";
    pub const RUN_NODE: &str = "Run Node";
    pub const UNREACHABLE_ENTRY: &str = "Unreachable Entry";
    pub const STORE_VARIABLE: &str = "Store Variable";
    pub const STOP: &str = "Stop";

    pub fn clause_start(clause: IfClauseType) -> String {
        format!("{} Clause Start", clause.as_str())
    }

    pub fn clause_fallback(clause: IfClauseType) -> String {
        format!("{} Clause Fallback", clause.as_str())
    }
}

pub(super) const START_SEQUENCE: &str = "None()";
pub(super) const CONTINUE_SEQUENCE: &str = "Continue()";
pub(super) const NEVER: &str = "false";

/// Entries created for one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum EntrySlots {
    Conversation { start: DbId, option_group: Option<DbId> },
    /// If-blocks, shortcut option lists and shortcut options: one way in, one way out.
    Bracket { start: DbId, end: DbId },
    Clause { start: DbId, fallback: Option<DbId> },
    Option {
        option: DbId,
        trigger: Option<DbId>,
        format: Option<DbId>,
    },
    Line { line: DbId, format: Option<DbId> },
    RunNode { run_node: DbId, unreachable: DbId },
    Stop(DbId),
    Single(DbId),
}

impl EntrySlots {
    /// The entry a `<<sequence ...>>` directive applies to.
    fn main(self) -> DbId {
        match self {
            EntrySlots::Conversation { start, .. } | EntrySlots::Bracket { start, .. } | EntrySlots::Clause { start, .. } => {
                start
            },
            EntrySlots::Option { option, .. } => option,
            EntrySlots::Line { line, .. } => line,
            EntrySlots::RunNode { run_node, .. } => run_node,
            EntrySlots::Stop(id) | EntrySlots::Single(id) => id,
        }
    }
}

/// Entry slots of one node, indexed by statement.
#[derive(Debug, Clone)]
pub(super) struct NodeEntries {
    pub conversation_id: DbId,
    slots: Vec<Option<EntrySlots>>,
}

impl NodeEntries {
    pub fn get(&self, id: StmtId) -> Option<EntrySlots> {
        self.slots.get(id.index()).copied().flatten()
    }

    pub fn start_entry(&self) -> DbId {
        match self.slots.first().copied().flatten() {
            Some(EntrySlots::Conversation { start, .. }) => start,
            _ => 0,
        }
    }
}

fn push(conversation: &mut Conversation, entry: DialogueEntry) -> DbId {
    let id = entry.id;
    conversation.entries.push(entry);
    id
}

impl YarnConverter<'_> {
    /// Create the entries of every statement, parents before children.
    pub(super) fn create_entries(
        &mut self,
        node: &ConversationNode,
        conversation: &mut Conversation,
    ) -> Result<NodeEntries, ConvertError> {
        let mut entries = NodeEntries {
            conversation_id: conversation.id,
            slots: vec![None; node.tree.len()],
        };
        for id in node.tree.descendants(node.root()) {
            entries.slots[id.index()] = self.statement_entries(node, id, conversation)?;
        }
        debug!("node '{}': {} entr(ies)", node.name, conversation.entries.len());
        Ok(entries)
    }

    fn statement_entries(
        &mut self,
        node: &ConversationNode,
        id: StmtId,
        conversation: &mut Conversation,
    ) -> Result<Option<EntrySlots>, ConvertError> {
        let tree = &node.tree;
        let parent_exit = || {
            tree.parent(id)
                .and_then(|p| tree.block(p))
                .and_then(|b| b.exit_label.clone())
                .unwrap_or_default()
        };

        let slots = match tree.kind(id) {
            StatementKind::Basic(stmt) => return self.basic_entries(node, stmt, conversation),
            StatementKind::Conversation(_) => {
                let mut start = self.new_entry(
                    conversation,
                    titles::CONVERSATION_START,
                    format!("Conversation Start - name: {}", node.name),
                );
                start.sequence = START_SEQUENCE.to_string();
                let start = push(conversation, start);
                let option_group = if node.options.is_empty() {
                    None
                } else {
                    let mut group = self.new_entry(
                        conversation,
                        titles::OPTION_GROUP,
                        format!("Option Group - conversation: {}", node.name),
                    );
                    group.is_group = true;
                    Some(push(conversation, group))
                };
                EntrySlots::Conversation { start, option_group }
            },
            StatementKind::IfBlock(if_block) => {
                let exit = if_block.block.exit_label.clone().unwrap_or_default();
                let mut start = self.new_entry(
                    conversation,
                    titles::IF_BLOCK_START,
                    format!("If Block Start - exit label: {exit}"),
                );
                start.is_group = true;
                let start = push(conversation, start);
                let end = self.continue_entry(conversation, titles::IF_BLOCK_END, format!("If Block End - exit label: {exit}"));
                EntrySlots::Bracket { start, end }
            },
            StatementKind::IfClause(clause) => {
                let exit = parent_exit();
                let kind = clause.clause_type.as_str();
                let mut start = self.new_entry(
                    conversation,
                    titles::clause_start(clause.clause_type),
                    format!("{kind} Clause Start - exit label: {exit}"),
                );
                start.sequence = CONTINUE_SEQUENCE.to_string();
                if let Some(conditions) = clause.conditions.and_then(|c| tree.basic(c)) {
                    start.conditions_string = lua::conditions(conditions)?;
                }
                let start = push(conversation, start);
                let fallback = if clause.clause_type == IfClauseType::Else {
                    None
                } else {
                    let mut fallback = self.new_entry(
                        conversation,
                        titles::clause_fallback(clause.clause_type),
                        format!("{kind} Clause Fallback - exit label: {exit}"),
                    );
                    fallback.is_group = true;
                    Some(push(conversation, fallback))
                };
                EntrySlots::Clause { start, fallback }
            },
            StatementKind::ShortcutOptionList(list) => {
                let exit = list.block.exit_label.clone().unwrap_or_default();
                let mut start = self.new_entry(
                    conversation,
                    titles::SHORTCUT_OPTION_LIST_START,
                    format!("Shortcut Option List Start - exit label: {exit}"),
                );
                start.is_group = true;
                let start = push(conversation, start);
                let end = self.continue_entry(
                    conversation,
                    titles::SHORTCUT_OPTION_LIST_END,
                    format!("Shortcut Option List End - exit label: {exit}"),
                );
                EntrySlots::Bracket { start, end }
            },
            StatementKind::ShortcutOption(option) => {
                let exit = parent_exit();
                let Some(offer) = tree.basic(option.option) else {
                    return Ok(None);
                };
                let key = text_key(node, offer)?;
                let destination = offer.branch_label.clone().unwrap_or_default();
                let mut start = self.new_entry(
                    conversation,
                    titles::SHORTCUT_OPTION_START,
                    format!("Shortcut Option Start - branch label: {destination}, exit label: {exit}"),
                );
                self.set_player_choice_actors(&mut start);
                self.set_entry_text(&mut start, &node.name, key)?;
                if let Some(conditions) = option.conditions.and_then(|c| tree.basic(c)) {
                    start.conditions_string = lua::conditions(conditions)?;
                }
                let start = push(conversation, start);
                let end = self.continue_entry(
                    conversation,
                    titles::SHORTCUT_OPTION_END,
                    format!("Shortcut Option End - branch label: {destination}, exit label: {exit}"),
                );
                EntrySlots::Bracket { start, end }
            },
        };
        Ok(Some(slots))
    }

    fn basic_entries(
        &mut self,
        node: &ConversationNode,
        stmt: &BasicStatement,
        conversation: &mut Conversation,
    ) -> Result<Option<EntrySlots>, ConvertError> {
        let slots = match stmt.main_opcode() {
            Opcode::AddOption => Some(self.add_option_entries(node, stmt, conversation)?),
            Opcode::RunLine => Some(self.run_line_entries(node, stmt, conversation)?),
            Opcode::RunCommand => self.run_command_entries(node, stmt, conversation)?,
            Opcode::RunNode => match &stmt.branch_label {
                // A bare run-node follows show-options and belongs to the options.
                None => None,
                Some(target) => {
                    let run_node = self.new_entry(conversation, titles::RUN_NODE, format!("Run Node - conversation: {target}"));
                    let run_node = push(conversation, run_node);
                    let mut unreachable = self.new_entry(
                        conversation,
                        titles::UNREACHABLE_ENTRY,
                        format!("Unreachable Entry after Run Node - node: {target}"),
                    );
                    unreachable.conditions_string = NEVER.to_string();
                    let unreachable = push(conversation, unreachable);
                    Some(EntrySlots::RunNode { run_node, unreachable })
                },
            },
            Opcode::StoreVariable => {
                let name = stmt
                    .main_instruction()
                    .string_operand(0)
                    .ok_or_else(|| missing_operand(node, stmt))?;
                let mut entry = self.new_entry(conversation, titles::STORE_VARIABLE, format!("Store Variable: name: {name}"));
                entry.user_script = lua::set_variable(name, stmt)?;
                entry.sequence = CONTINUE_SEQUENCE.to_string();
                Some(EntrySlots::Single(push(conversation, entry)))
            },
            Opcode::Stop => {
                let mut entry = self.new_entry(
                    conversation,
                    titles::STOP,
                    "Stop instruction: the conversation ends here".to_string(),
                );
                entry.conditions_string = NEVER.to_string();
                Some(EntrySlots::Stop(push(conversation, entry)))
            },
            Opcode::JumpTo
            | Opcode::Jump
            | Opcode::ShowOptions
            | Opcode::PushString
            | Opcode::PushFloat
            | Opcode::PushBool
            | Opcode::PushNull
            | Opcode::JumpIfFalse
            | Opcode::Pop
            | Opcode::CallFunc
            | Opcode::PushVariable => None,
        };

        if let (Some(slots), Some(sequence)) = (slots, stmt.sequence.as_deref()) {
            if let Some(entry) = conversation.entry_mut(slots.main()) {
                entry.sequence = sequence.to_string();
            }
        }
        Ok(slots)
    }

    fn add_option_entries(
        &mut self,
        node: &ConversationNode,
        stmt: &BasicStatement,
        conversation: &mut Conversation,
    ) -> Result<EntrySlots, ConvertError> {
        let key = text_key(node, stmt)?;
        let mut option = self.new_entry(
            conversation,
            titles::ADD_OPTION,
            format!("Add Option - line key: {key}, conversation: {}", node.name),
        );
        self.set_player_choice_actors(&mut option);
        self.set_entry_text(&mut option, &node.name, key)?;
        if let Some(flag) = &stmt.option_conditions_variable {
            option.conditions_string = lua::lua_variable_name(flag)?.to_string();
        }
        let option = push(conversation, option);

        let trigger = match &stmt.option_conditions_variable {
            Some(flag) => {
                let mut trigger = self.new_entry(
                    conversation,
                    titles::TRIGGER_OPTION,
                    format!("Trigger Option - line key: {key}, flag: {flag}"),
                );
                trigger.user_script = lua::option_conditions(flag)?;
                trigger.sequence = CONTINUE_SEQUENCE.to_string();
                Some(push(conversation, trigger))
            },
            None => None,
        };

        // Option text arguments are computed on the way to the option group, before it is shown.
        let format = if stmt.has_arguments {
            let mut format = self.new_entry(
                conversation,
                titles::FORMAT_OPTION,
                format!("Format Option - line key: {key}, conversation: {}", node.name),
            );
            format.user_script = lua::format_string_arguments(conversation.id, option, stmt)?;
            format.sequence = CONTINUE_SEQUENCE.to_string();
            Some(push(conversation, format))
        } else {
            None
        };

        Ok(EntrySlots::Option { option, trigger, format })
    }

    fn run_line_entries(
        &mut self,
        node: &ConversationNode,
        stmt: &BasicStatement,
        conversation: &mut Conversation,
    ) -> Result<EntrySlots, ConvertError> {
        let key = text_key(node, stmt)?;
        let mut line = self.new_entry(conversation, titles::RUN_LINE, format!("Run Line - line key: {key}"));
        self.set_line_actors(&mut line, key)?;
        self.set_entry_text(&mut line, &node.name, key)?;
        line.sequence = CONTINUE_SEQUENCE.to_string();
        let line = push(conversation, line);

        let format = if stmt.has_arguments {
            let mut format = self.new_entry(
                conversation,
                titles::FORMAT_RUN_LINE,
                format!("Format RunLine - line key: {key}, conversation: {}", node.name),
            );
            format.user_script = lua::format_string_arguments(conversation.id, line, stmt)?;
            format.sequence = CONTINUE_SEQUENCE.to_string();
            Some(push(conversation, format))
        } else {
            None
        };
        Ok(EntrySlots::Line { line, format })
    }

    fn run_command_entries(
        &mut self,
        node: &ConversationNode,
        stmt: &BasicStatement,
        conversation: &mut Conversation,
    ) -> Result<Option<EntrySlots>, ConvertError> {
        let text = stmt
            .last_instruction()
            .string_operand(0)
            .ok_or_else(|| missing_operand(node, stmt))?;
        let tokens = lua::command_tokens(text);
        let Some(name) = tokens.first() else {
            warn!("node '{}': skipping an empty command", node.name);
            return Ok(None);
        };
        let description = format!("Run Command - cmd: '{text}'");

        let entry = if name == WAIT_COMMAND {
            if stmt.has_arguments {
                warn!(
                    "node '{}': '{text}' computes its duration at runtime; wait needs a literal duration such as <<wait 5>>",
                    node.name
                );
                self.continue_entry(
                    conversation,
                    titles::UNSUPPORTED_WAIT,
                    "Wait commands need a literal duration, for example <<wait 5>>".to_string(),
                )
            } else {
                let amount = tokens.get(1).map_or("0", String::as_str);
                let mut entry = self.new_entry(conversation, titles::RUN_COMMAND, description);
                entry.sequence = format!("Delay({amount})");
                push(conversation, entry)
            }
        } else if name == RAW_SEQUENCE_COMMAND {
            let sequence = text.trim_start().strip_prefix(RAW_SEQUENCE_COMMAND).unwrap_or_default().trim();
            if sequence.is_empty() {
                debug!("node '{}': empty seq command ignored", node.name);
                return Ok(None);
            }
            let mut entry = self.new_entry(conversation, titles::SEQUENCE, description);
            entry.sequence = sequence.to_string();
            push(conversation, entry)
        } else {
            let Some(call) = lua::command_call(&tokens, stmt.has_arguments) else {
                return Ok(None);
            };
            let mut entry = self.new_entry(conversation, titles::RUN_COMMAND, description);
            entry.user_script = if stmt.has_arguments {
                lua::run_command_with_runtime_arguments(&call, stmt)?
            } else {
                format!("{call}\n")
            };
            entry.sequence = CONTINUE_SEQUENCE.to_string();
            push(conversation, entry)
        };
        Ok(Some(EntrySlots::Single(entry)))
    }

    /// A fresh entry spoken by the NPC to the player.
    fn new_entry(&self, conversation: &Conversation, title: impl Into<String>, description: String) -> DialogueEntry {
        DialogueEntry {
            id: conversation.next_entry_id(),
            conversation_id: conversation.id,
            title: title.into(),
            description,
            actor_id: self.npc_id,
            conversant_id: self.player_id,
            ..DialogueEntry::default()
        }
    }

    fn continue_entry(&self, conversation: &mut Conversation, title: &str, description: String) -> DbId {
        let mut entry = self.new_entry(conversation, title, description);
        entry.sequence = CONTINUE_SEQUENCE.to_string();
        push(conversation, entry)
    }

    /// Options are always the player's to pick.
    fn set_player_choice_actors(&self, entry: &mut DialogueEntry) {
        entry.actor_id = self.player_id;
        entry.conversant_id = self.npc_id;
    }

    /// The speaker named in the default text says the line; unnamed lines are the player's.
    fn set_line_actors(&mut self, entry: &mut DialogueEntry, key: &str) -> Result<(), ConvertError> {
        let project = self.project;
        let text = line_text(project, key)?;
        let actor = match self.patterns.speaker(text) {
            Some(name) => self.get_or_create_actor(name, false, None),
            None => self.player_id,
        };
        entry.actor_id = actor;
        entry.conversant_id = if actor == self.player_id { self.npc_id } else { self.player_id };
        Ok(())
    }

    /// Default and localized text of a line, speaker prefixes stripped. Speakers
    /// named in localized text become the actor's display name for that locale.
    fn set_entry_text(&mut self, entry: &mut DialogueEntry, node: &str, key: &str) -> Result<(), ConvertError> {
        let project = self.project;
        let text = line_text(project, key)?;
        entry.dialogue_text = self.patterns.strip_prefix(text).to_string();

        let Some(texts) = self.localized.texts(node, key) else {
            return Ok(());
        };
        for (locale, text) in texts {
            if let Some(name) = self.patterns.speaker(text) {
                if let Some(actor) = self.db.actor_mut(entry.actor_id) {
                    actor.display_names.insert(locale.clone(), name.to_string());
                }
            }
            entry
                .localized_text
                .insert(locale.clone(), self.patterns.strip_prefix(text).to_string());
        }
        Ok(())
    }
}

fn line_text<'p>(project: &'p crate::YarnProject, key: &str) -> Result<&'p str, ConvertError> {
    project
        .string_table
        .get(key)
        .map(|info| info.text.as_str())
        .ok_or_else(|| ConvertError::MissingString { key: key.to_string() })
}

/// Line key of a run-line or add-option statement.
fn text_key<'s>(node: &ConversationNode, stmt: &'s BasicStatement) -> Result<&'s str, ConvertError> {
    stmt.last_instruction()
        .string_operand(0)
        .ok_or_else(|| missing_operand(node, stmt))
}

fn missing_operand(node: &ConversationNode, stmt: &BasicStatement) -> ConvertError {
    ConvertError::MissingStatementOperand {
        node: node.name.clone(),
        opcode: stmt.main_opcode(),
    }
}

//! Link resolution: thread one "previous exit entry" through every statement.
//!
//! Each statement is entered through one entry and left through one entry
//! (often the same). Resolving a block links its statements in order and
//! returns the exit entry of the last one.

use std::collections::BTreeMap;

use yarn_data::{ConditionPriority, Conversation, DbId, Link};

use super::entries::{EntrySlots, NodeEntries};
use crate::ConvertError;
use crate::project::ConversationNode;
use crate::statement::{StatementKind, StmtId};

/// Conversation id and start entry of every node, by node name.
pub(super) type StartEntries<'n> = BTreeMap<&'n str, (DbId, DbId)>;

pub(super) fn resolve_links(
    node: &ConversationNode,
    entries: &NodeEntries,
    targets: &StartEntries<'_>,
    conversation: &mut Conversation,
) -> Result<(), ConvertError> {
    let mut linker = Linker {
        node,
        entries,
        targets,
        conversation,
    };
    let last = linker.resolve_block(node.root(), entries.start_entry())?;
    linker.resolve_conversation_options(last)
}

struct Linker<'a, 'n> {
    node: &'a ConversationNode,
    entries: &'a NodeEntries,
    targets: &'a StartEntries<'n>,
    conversation: &'a mut Conversation,
}

impl Linker<'_, '_> {
    fn link(&mut self, from: DbId, to: DbId, priority: ConditionPriority) {
        let id = self.conversation.id;
        if let Some(entry) = self.conversation.entry_mut(from) {
            entry.outgoing_links.push(Link::new((id, from), (id, to)).with_priority(priority));
        }
    }

    fn follow(&mut self, from: DbId, to: DbId) {
        self.link(from, to, ConditionPriority::Normal);
    }

    /// Hand control to another node's start entry.
    fn connect(&mut self, from: DbId, target: (DbId, DbId)) {
        let id = self.conversation.id;
        if let Some(entry) = self.conversation.entry_mut(from) {
            entry.outgoing_links.push(Link::new((id, from), target).connector());
        }
    }

    fn target(&self, stmt: StmtId) -> Result<(DbId, DbId), ConvertError> {
        let name = self
            .node
            .tree
            .basic(stmt)
            .and_then(|s| s.branch_label.as_deref())
            .unwrap_or_default();
        self.targets.get(name).copied().ok_or_else(|| ConvertError::UnknownNode {
            node: self.node.name.clone(),
            target: name.to_string(),
        })
    }

    fn resolve_block(&mut self, block: StmtId, mut previous: DbId) -> Result<DbId, ConvertError> {
        let node = self.node;
        for &child in node.tree.children(block) {
            previous = match node.tree.kind(child) {
                StatementKind::Basic(_) => self.resolve_basic(child, previous)?,
                StatementKind::IfBlock(_) => self.resolve_if_block(child, previous)?,
                StatementKind::ShortcutOptionList(_) => self.resolve_option_list(child, previous)?,
                StatementKind::Conversation(_) | StatementKind::IfClause(_) | StatementKind::ShortcutOption(_) => {
                    self.resolve_block(child, previous)?
                },
            };
        }
        Ok(previous)
    }

    fn resolve_basic(&mut self, stmt: StmtId, previous: DbId) -> Result<DbId, ConvertError> {
        let Some(slots) = self.entries.get(stmt) else {
            return Ok(previous);
        };
        let exit = match slots {
            // The option entry itself hangs off the option group; only its
            // flag and text arguments are computed here.
            EntrySlots::Option { trigger, format, .. } => {
                let mut previous = previous;
                for next in [trigger, format].into_iter().flatten() {
                    self.follow(previous, next);
                    previous = next;
                }
                previous
            },
            EntrySlots::RunNode { run_node, unreachable } => {
                let target = self.target(stmt)?;
                self.follow(previous, run_node);
                self.connect(run_node, target);
                self.link(run_node, unreachable, ConditionPriority::BelowNormal);
                unreachable
            },
            EntrySlots::Line { line, format } => {
                match format {
                    Some(format) => {
                        self.follow(previous, format);
                        self.follow(format, line);
                    },
                    None => self.follow(previous, line),
                }
                line
            },
            EntrySlots::Stop(stop) => {
                self.link(previous, stop, ConditionPriority::High);
                stop
            },
            EntrySlots::Single(id) => {
                self.follow(previous, id);
                id
            },
            EntrySlots::Conversation { .. } | EntrySlots::Bracket { .. } | EntrySlots::Clause { .. } => previous,
        };
        Ok(exit)
    }

    /// Each if/elseif clause is entered at normal priority with its conditions;
    /// its fallback is taken at below-normal priority and leads to the next clause.
    fn resolve_if_block(&mut self, if_block: StmtId, previous: DbId) -> Result<DbId, ConvertError> {
        let Some(EntrySlots::Bracket { start, end }) = self.entries.get(if_block) else {
            return Ok(previous);
        };
        self.follow(previous, start);

        let node = self.node;
        let mut previous = start;
        let mut last_fallback = None;
        for (clause, _) in node.tree.clauses(if_block) {
            let Some(EntrySlots::Clause {
                start: clause_start,
                fallback,
            }) = self.entries.get(clause)
            else {
                continue;
            };
            self.follow(previous, clause_start);
            let body_exit = self.resolve_block(clause, clause_start)?;
            self.follow(body_exit, end);

            if let Some(fallback) = fallback {
                self.link(previous, fallback, ConditionPriority::BelowNormal);
                previous = fallback;
                last_fallback = Some(fallback);
            }
        }

        if !node.tree.has_else(if_block) {
            if let Some(fallback) = last_fallback {
                self.follow(fallback, end);
            }
        }
        Ok(end)
    }

    fn resolve_option_list(&mut self, list: StmtId, previous: DbId) -> Result<DbId, ConvertError> {
        let Some(EntrySlots::Bracket { start, end }) = self.entries.get(list) else {
            return Ok(previous);
        };
        let node = self.node;
        let StatementKind::ShortcutOptionList(options) = node.tree.kind(list) else {
            return Ok(previous);
        };
        self.follow(previous, start);

        let mut all_conditional = true;
        for &option in &options.options {
            let StatementKind::ShortcutOption(shortcut) = node.tree.kind(option) else {
                continue;
            };
            let Some(EntrySlots::Bracket {
                start: option_start,
                end: option_end,
            }) = self.entries.get(option)
            else {
                continue;
            };
            all_conditional &= shortcut.conditions.is_some();

            self.follow(start, option_start);
            let body_exit = self.resolve_block(option, option_start)?;
            self.follow(body_exit, option_end);
            self.follow(option_end, end);
        }

        // Every option may be hidden; the list must still be able to continue.
        if all_conditional {
            self.link(start, end, ConditionPriority::BelowNormal);
        }
        Ok(end)
    }

    /// Offer the node's cross-conversation options once its body has played.
    fn resolve_conversation_options(&mut self, previous: DbId) -> Result<(), ConvertError> {
        let Some(EntrySlots::Conversation {
            option_group: Some(group),
            ..
        }) = self.entries.get(self.node.root())
        else {
            return Ok(());
        };
        self.follow(previous, group);

        let node = self.node;
        for &option in &node.options {
            let Some(EntrySlots::Option { option: entry, .. }) = self.entries.get(option) else {
                continue;
            };
            self.follow(group, entry);
            let target = self.target(option)?;
            self.connect(entry, target);
        }
        Ok(())
    }
}

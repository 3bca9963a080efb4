//! Dialogue database generation.
//!
//! Conversion runs over a finished [`YarnProject`] in three passes:
//! every node first gets a conversation and one or more entries per
//! statement, then the statement trees are walked again to link those
//! entries, and finally placeholder entries nothing reaches are culled.
//! Entries and links are created in program order, so converting the same
//! project twice yields the same ids.

mod cull;
mod entries;
mod links;

use std::collections::BTreeMap;

use log::{debug, info};
use yarn_data::{Actor, CommandDef, Conversation, DbId, DialogueDatabase, LocalizedString, Variable};

use crate::ConvertError;
use crate::config::{ConverterConfig, TextPatterns};
use crate::localization::LocalizedStringTable;
use crate::lua::{GLOBAL_USER_SCRIPT, lua_variable_name};
use crate::project::{ConversationNode, YarnProject};

pub use cull::cull_unreachable_entries;
pub use entries::titles;

use entries::NodeEntries;

pub const PLAYER_ACTOR_ID: DbId = 1;
pub const NPC_ACTOR_ID: DbId = 2;
pub const NPC_ACTOR_NAME: &str = "NPC";

/// Node header keys naming a conversation's actor and conversant.
pub const METADATA_ACTOR_KEY: &str = "actor";
pub const METADATA_CONVERSANT_KEY: &str = "conversant";

/// Converts one project into (or onto) a dialogue database.
#[derive(Debug)]
pub struct YarnConverter<'a> {
    config: &'a ConverterConfig,
    patterns: TextPatterns,
    project: &'a YarnProject,
    db: DialogueDatabase,
    localized: LocalizedStringTable,
    player_id: DbId,
    npc_id: DbId,
}

impl<'a> YarnConverter<'a> {
    /// Prepare a conversion onto `db`, which may already hold earlier imports.
    ///
    /// # Errors
    /// Returns [`ConvertError::InvalidPattern`] when a configured pattern does not compile.
    pub fn new(config: &'a ConverterConfig, project: &'a YarnProject, db: DialogueDatabase) -> Result<Self, ConvertError> {
        Ok(Self {
            config,
            patterns: config.patterns()?,
            project,
            db,
            localized: LocalizedStringTable::default(),
            player_id: PLAYER_ACTOR_ID,
            npc_id: NPC_ACTOR_ID,
        })
    }

    pub fn patterns(&self) -> &TextPatterns {
        &self.patterns
    }

    /// Run the whole conversion.
    ///
    /// Conversations whose title matches a node are rebuilt in place and keep
    /// their id; everything else in the database is left alone.
    ///
    /// # Errors
    /// Stops at the first missing string, unknown node or malformed expression.
    pub fn convert(mut self, localized: Vec<LocalizedString>) -> Result<DialogueDatabase, ConvertError> {
        self.cache_localized_strings(localized);
        self.create_global_variables()?;
        self.create_default_actors();

        let project = self.project;
        let mut nodes: BTreeMap<String, NodeEntries> = BTreeMap::new();
        for node in project.nodes.values() {
            let conversation_id = self.prepare_conversation(node);
            let entries = self.with_conversation(conversation_id, |converter, conversation| {
                converter.create_entries(node, conversation)
            })?;
            nodes.insert(node.name.clone(), entries);
        }

        let targets: links::StartEntries<'_> = nodes
            .iter()
            .map(|(name, entries)| (name.as_str(), (entries.conversation_id, entries.start_entry())))
            .collect();
        for node in project.nodes.values() {
            let Some(entries) = nodes.get(&node.name) else {
                continue;
            };
            self.with_conversation(entries.conversation_id, |_, conversation| {
                links::resolve_links(node, entries, &targets, conversation)
            })?;
        }

        let mut culled = 0;
        for entries in nodes.values() {
            if let Some(conversation) = self.conversation_mut(entries.conversation_id) {
                culled += cull_unreachable_entries(conversation);
            }
        }
        debug!("culled {culled} unreachable placeholder entr(ies)");

        self.register_commands();
        self.install_global_user_script();

        info!(
            "converted {} node(s): {} actor(s), {} variable(s), {} command(s)",
            nodes.len(),
            self.db.actors.len(),
            self.db.variables.len(),
            self.db.commands.len()
        );
        Ok(self.db)
    }

    fn cache_localized_strings(&mut self, localized: Vec<LocalizedString>) {
        self.localized = LocalizedStringTable::new(localized);
        let mut locales = std::mem::take(&mut self.db.locales);
        locales.extend(self.localized.locales());
        locales.sort();
        locales.dedup();
        self.db.locales = locales;
    }

    /// Add every global variable the database does not define yet.
    fn create_global_variables(&mut self) -> Result<(), ConvertError> {
        for variable in self.project.symbols.globals() {
            let name = lua_variable_name(&variable.name)?;
            if self.db.variable_by_name(name).is_some() {
                debug!("keeping existing variable '{name}'");
                continue;
            }
            let id = self.db.next_variable_id();
            self.db.variables.push(Variable {
                id,
                name: name.to_string(),
                field_type: variable.kind.field_type(),
                initial_value: variable.initial_value.clone(),
            });
        }
        Ok(())
    }

    fn create_default_actors(&mut self) {
        let player_name = self.config.player_name().to_string();
        self.player_id = self.get_or_create_actor(&player_name, true, Some(PLAYER_ACTOR_ID));
        self.npc_id = self.get_or_create_actor(NPC_ACTOR_NAME, false, Some(NPC_ACTOR_ID));
    }

    /// Id of the actor called `name`, created when missing. A preferred id
    /// already taken by another actor falls back to the next free one.
    pub(crate) fn get_or_create_actor(&mut self, name: &str, is_player: bool, preferred: Option<DbId>) -> DbId {
        if let Some(actor) = self.db.actor_by_name(name) {
            return actor.id;
        }
        let id = preferred
            .filter(|id| self.db.actor(*id).is_none())
            .unwrap_or_else(|| self.db.next_actor_id());
        debug!("creating actor '{name}' with id {id}");
        self.db.actors.push(Actor {
            id,
            name: name.to_string(),
            is_player,
            display_names: BTreeMap::new(),
        });
        id
    }

    /// Create the node's conversation, or empty the existing one of that title.
    fn prepare_conversation(&mut self, node: &ConversationNode) -> DbId {
        let actor_id = match node.metadata_value(METADATA_ACTOR_KEY) {
            Some(name) => self.get_or_create_actor(name, false, None),
            None => self.player_id,
        };
        let conversant_id = match node.metadata_value(METADATA_CONVERSANT_KEY) {
            Some(name) => self.get_or_create_actor(name, false, None),
            None => self.npc_id,
        };

        if let Some(existing) = self.db.conversations.iter_mut().find(|c| c.title == node.name) {
            debug!("rebuilding conversation '{}' (id {})", node.name, existing.id);
            existing.entries.clear();
            existing.actor_id = actor_id;
            existing.conversant_id = conversant_id;
            return existing.id;
        }

        let id = self.db.next_conversation_id();
        self.db.conversations.push(Conversation {
            id,
            title: node.name.clone(),
            actor_id,
            conversant_id,
            entries: Vec::new(),
        });
        id
    }

    fn conversation_mut(&mut self, id: DbId) -> Option<&mut Conversation> {
        self.db.conversations.iter_mut().find(|c| c.id == id)
    }

    /// Run `f` on a conversation lifted out of the database, so `f` may still
    /// touch the rest of the converter (actors, in particular).
    fn with_conversation<T>(
        &mut self,
        id: DbId,
        f: impl FnOnce(&mut Self, &mut Conversation) -> Result<T, ConvertError>,
    ) -> Result<T, ConvertError> {
        let index = self
            .db
            .conversations
            .iter()
            .position(|c| c.id == id)
            .ok_or(ConvertError::MissingConversation { id })?;
        let mut conversation = std::mem::take(&mut self.db.conversations[index]);
        let result = f(self, &mut conversation);
        self.db.conversations[index] = conversation;
        result
    }

    /// Record every custom command and function. Built-in commands are the runtime's own.
    fn register_commands(&mut self) {
        for command in self.project.symbols.commands.values() {
            if command.is_built_in() || self.db.commands.iter().any(|c| c.name == command.name) {
                continue;
            }
            self.db.commands.push(CommandDef {
                name: command.name.clone(),
                parameter_count: command.parameter_count,
            });
        }
    }

    fn install_global_user_script(&mut self) {
        let existing = std::mem::take(&mut self.db.global_user_script);
        self.db.global_user_script = if self.config.overwrite_global_script {
            GLOBAL_USER_SCRIPT.to_string()
        } else if existing.starts_with(GLOBAL_USER_SCRIPT) {
            existing
        } else {
            format!("{GLOBAL_USER_SCRIPT}{existing}")
        };
    }
}

/// Convert `project` onto `db` in one call.
///
/// # Errors
/// See [`YarnConverter::new`] and [`YarnConverter::convert`].
pub fn convert_project(
    config: &ConverterConfig,
    project: &YarnProject,
    db: DialogueDatabase,
    localized: Vec<LocalizedString>,
) -> Result<DialogueDatabase, ConvertError> {
    YarnConverter::new(config, project, db)?.convert(localized)
}

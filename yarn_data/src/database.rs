use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Numeric id of an actor, conversation, entry or variable.
pub type DbId = u32;

/// The converter's output: everything a dialogue runtime needs to play the converted program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogueDatabase {
    #[serde(default)]
    pub actors: Vec<Actor>,
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub commands: Vec<CommandDef>,
    /// Locales that carry localized text fields, sorted.
    #[serde(default)]
    pub locales: Vec<String>,
    #[serde(default)]
    pub global_user_script: String,
}

impl DialogueDatabase {
    pub fn actor(&self, id: DbId) -> Option<&Actor> {
        self.actors.iter().find(|a| a.id == id)
    }

    pub fn actor_by_name(&self, name: &str) -> Option<&Actor> {
        self.actors.iter().find(|a| a.name == name)
    }

    pub fn actor_by_name_mut(&mut self, name: &str) -> Option<&mut Actor> {
        self.actors.iter_mut().find(|a| a.name == name)
    }

    pub fn actor_mut(&mut self, id: DbId) -> Option<&mut Actor> {
        self.actors.iter_mut().find(|a| a.id == id)
    }

    pub fn conversation(&self, id: DbId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn conversation_by_title(&self, title: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.title == title)
    }

    pub fn variable_by_name(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Look up an entry by conversation and entry id.
    pub fn entry(&self, conversation: DbId, entry: DbId) -> Option<&DialogueEntry> {
        self.conversation(conversation).and_then(|c| c.entry(entry))
    }

    pub fn next_actor_id(&self) -> DbId {
        next_id(self.actors.iter().map(|a| a.id), 1)
    }

    pub fn next_conversation_id(&self) -> DbId {
        next_id(self.conversations.iter().map(|c| c.id), 1)
    }

    pub fn next_variable_id(&self) -> DbId {
        next_id(self.variables.iter().map(|v| v.id), 1)
    }
}

fn next_id(ids: impl Iterator<Item = DbId>, first: DbId) -> DbId {
    ids.max().map_or(first, |max| max + 1)
}

/// A speaker. The player actor speaks every option.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: DbId,
    pub name: String,
    #[serde(default)]
    pub is_player: bool,
    /// Localized display names, keyed by locale.
    #[serde(default)]
    pub display_names: BTreeMap<String, String>,
}

/// A converted Yarn node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: DbId,
    pub title: String,
    pub actor_id: DbId,
    pub conversant_id: DbId,
    #[serde(default)]
    pub entries: Vec<DialogueEntry>,
}

impl Conversation {
    pub fn entry(&self, id: DbId) -> Option<&DialogueEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: DbId) -> Option<&mut DialogueEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Entry ids start at 0 and the start entry takes the first one.
    pub fn next_entry_id(&self) -> DbId {
        next_id(self.entries.iter().map(|e| e.id), 0)
    }

    /// Entries carrying the given title, in creation order.
    pub fn entries_titled<'a>(&'a self, title: &'a str) -> impl Iterator<Item = &'a DialogueEntry> + 'a {
        self.entries.iter().filter(move |e| e.title == title)
    }
}

/// One node of the dialogue graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogueEntry {
    pub id: DbId,
    pub conversation_id: DbId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub actor_id: DbId,
    pub conversant_id: DbId,
    /// Group entries are pass-through nodes the runtime never displays.
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub dialogue_text: String,
    /// Localized text, keyed by locale.
    #[serde(default)]
    pub localized_text: BTreeMap<String, String>,
    /// Lua expression deciding whether links into this entry are open.
    #[serde(default)]
    pub conditions_string: String,
    /// Lua run when the entry is played.
    #[serde(default)]
    pub user_script: String,
    #[serde(default)]
    pub sequence: String,
    #[serde(default)]
    pub outgoing_links: Vec<Link>,
}

impl DialogueEntry {
    /// Pick the link the runtime follows: the highest priority among open links,
    /// the first listed on ties.
    ///
    /// ```
    /// use yarn_data::{ConditionPriority, DialogueEntry, Link};
    ///
    /// let mut entry = DialogueEntry::default();
    /// entry.outgoing_links.push(Link::new((1, 0), (1, 1)).with_priority(ConditionPriority::BelowNormal));
    /// entry.outgoing_links.push(Link::new((1, 0), (1, 2)));
    /// entry.outgoing_links.push(Link::new((1, 0), (1, 3)));
    ///
    /// let chosen = entry.select_link(|_| true).map(|l| l.destination_entry);
    /// assert_eq!(chosen, Some(2));
    /// let fallback = entry.select_link(|l| l.priority < ConditionPriority::Normal).map(|l| l.destination_entry);
    /// assert_eq!(fallback, Some(1));
    /// ```
    pub fn select_link(&self, is_open: impl Fn(&Link) -> bool) -> Option<&Link> {
        let mut best: Option<&Link> = None;
        for link in &self.outgoing_links {
            if !is_open(link) {
                continue;
            }
            match best {
                Some(current) if current.priority >= link.priority => {},
                _ => best = Some(link),
            }
        }
        best
    }
}

/// Runtime ordering among simultaneously open links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionPriority {
    Low,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    High,
}

/// A directed edge between two entries, possibly across conversations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub origin_conversation: DbId,
    pub origin_entry: DbId,
    pub destination_conversation: DbId,
    pub destination_entry: DbId,
    #[serde(default)]
    pub priority: ConditionPriority,
    /// Connector links hand control to another conversation.
    #[serde(default)]
    pub is_connector: bool,
}

impl Link {
    /// A normal-priority link between `(conversation, entry)` pairs.
    pub fn new(origin: (DbId, DbId), destination: (DbId, DbId)) -> Self {
        Self {
            origin_conversation: origin.0,
            origin_entry: origin.1,
            destination_conversation: destination.0,
            destination_entry: destination.1,
            priority: ConditionPriority::Normal,
            is_connector: false,
        }
    }

    pub fn with_priority(mut self, priority: ConditionPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn connector(mut self) -> Self {
        self.is_connector = true;
        self
    }

    pub fn leaves_conversation(&self) -> bool {
        self.origin_conversation != self.destination_conversation
    }
}

/// Field type of a database variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Number,
    Boolean,
}

/// A global dialogue variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: DbId,
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub initial_value: Option<String>,
}

/// A custom command or function the runtime must provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDef {
    pub name: String,
    pub parameter_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_are_totally_ordered() {
        assert!(ConditionPriority::High > ConditionPriority::Normal);
        assert!(ConditionPriority::Normal > ConditionPriority::BelowNormal);
        assert!(ConditionPriority::BelowNormal > ConditionPriority::Low);
        assert_eq!(ConditionPriority::default(), ConditionPriority::Normal);
    }

    #[test]
    fn select_link_prefers_priority_then_order() {
        let mut entry = DialogueEntry::default();
        entry.outgoing_links.push(Link::new((1, 0), (1, 1)));
        entry.outgoing_links.push(Link::new((1, 0), (1, 2)).with_priority(ConditionPriority::High));
        entry.outgoing_links.push(Link::new((1, 0), (1, 3)).with_priority(ConditionPriority::High));
        let chosen = entry.select_link(|_| true).expect("a link");
        assert_eq!(chosen.destination_entry, 2);

        let closed_high = entry.select_link(|l| l.priority != ConditionPriority::High).expect("a link");
        assert_eq!(closed_high.destination_entry, 1);
        assert!(entry.select_link(|_| false).is_none());
    }

    #[test]
    fn next_ids_start_where_expected() {
        let mut db = DialogueDatabase::default();
        assert_eq!(db.next_actor_id(), 1);
        assert_eq!(db.next_conversation_id(), 1);
        db.actors.push(Actor {
            id: 7,
            name: "Sally".into(),
            ..Actor::default()
        });
        assert_eq!(db.next_actor_id(), 8);

        let mut conv = Conversation::default();
        assert_eq!(conv.next_entry_id(), 0);
        conv.entries.push(DialogueEntry {
            id: 4,
            ..DialogueEntry::default()
        });
        assert_eq!(conv.next_entry_id(), 5);
    }
}

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::*;

/// Validation error for malformed or dangling references in a `DialogueDatabase`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    DuplicateId { kind: &'static str, id: String },
    MissingReference { kind: &'static str, id: String, context: String },
    InvalidValue { context: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::DuplicateId { kind, id } => {
                write!(f, "duplicate {kind} id '{id}'")
            },
            ValidationError::MissingReference { kind, id, context } => {
                write!(f, "missing {kind} '{id}' ({context})")
            },
            ValidationError::InvalidValue { context } => {
                write!(f, "invalid value ({context})")
            },
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate ids, cross-references and link consistency in a `DialogueDatabase`.
///
/// ```
/// use yarn_data::{Actor, Conversation, DialogueDatabase, DialogueEntry, Link, validate_database};
///
/// let mut start = DialogueEntry { id: 0, conversation_id: 1, title: "START".into(), actor_id: 1, conversant_id: 1, ..DialogueEntry::default() };
/// start.outgoing_links.push(Link::new((1, 0), (1, 1)));
/// let line = DialogueEntry { id: 1, conversation_id: 1, title: "Run Line".into(), actor_id: 1, conversant_id: 1, ..DialogueEntry::default() };
///
/// let db = DialogueDatabase {
///     actors: vec![Actor { id: 1, name: "Player".into(), is_player: true, ..Actor::default() }],
///     conversations: vec![Conversation {
///         id: 1,
///         title: "Start".into(),
///         actor_id: 1,
///         conversant_id: 1,
///         entries: vec![start, line],
///     }],
///     ..DialogueDatabase::default()
/// };
/// assert!(validate_database(&db).is_empty());
/// ```
pub fn validate_database(db: &DialogueDatabase) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut actors = HashSet::new();
    let mut conversations = HashSet::new();
    let mut titles = HashSet::new();
    let mut variables = HashSet::new();

    track_ids("actor", db.actors.iter().map(|a| a.id.to_string()), &mut actors, &mut errors);
    track_ids(
        "conversation",
        db.conversations.iter().map(|c| c.id.to_string()),
        &mut conversations,
        &mut errors,
    );
    track_ids(
        "conversation title",
        db.conversations.iter().map(|c| c.title.clone()),
        &mut titles,
        &mut errors,
    );
    track_ids(
        "variable",
        db.variables.iter().map(|v| v.name.clone()),
        &mut variables,
        &mut errors,
    );

    if !db.actors.iter().any(|a| a.is_player) && !db.conversations.is_empty() {
        errors.push(ValidationError::InvalidValue {
            context: "no player actor".to_string(),
        });
    }

    // Entry ids per conversation, gathered up front so links can point forward and across.
    let mut entries: HashMap<DbId, HashSet<String>> = HashMap::new();
    for conv in &db.conversations {
        let mut ids = HashSet::new();
        track_ids(
            "entry",
            conv.entries.iter().map(|e| format!("{}:{}", conv.id, e.id)),
            &mut ids,
            &mut errors,
        );
        entries.insert(conv.id, conv.entries.iter().map(|e| e.id.to_string()).collect());
    }

    for conv in &db.conversations {
        let context = format!("conversation '{}'", conv.title);
        check_ref("actor", &conv.actor_id.to_string(), &actors, context.clone(), &mut errors);
        check_ref("actor", &conv.conversant_id.to_string(), &actors, context.clone(), &mut errors);
        if conv.entry(0).is_none() {
            errors.push(ValidationError::InvalidValue {
                context: format!("{context} has no start entry"),
            });
        }

        for entry in &conv.entries {
            let context = format!("conversation '{}' entry {} '{}'", conv.title, entry.id, entry.title);
            validate_entry(conv, entry, &actors, &conversations, &entries, &context, &mut errors);
        }
    }

    errors
}

fn validate_entry(
    conv: &Conversation,
    entry: &DialogueEntry,
    actors: &HashSet<String>,
    conversations: &HashSet<String>,
    entries: &HashMap<DbId, HashSet<String>>,
    context: &str,
    errors: &mut Vec<ValidationError>,
) {
    if entry.conversation_id != conv.id {
        errors.push(ValidationError::InvalidValue {
            context: format!("{context} claims conversation {}", entry.conversation_id),
        });
    }
    check_ref("actor", &entry.actor_id.to_string(), actors, context.to_string(), errors);
    check_ref("actor", &entry.conversant_id.to_string(), actors, context.to_string(), errors);

    for link in &entry.outgoing_links {
        if link.origin_conversation != conv.id || link.origin_entry != entry.id {
            errors.push(ValidationError::InvalidValue {
                context: format!(
                    "{context} holds a link from {}:{}",
                    link.origin_conversation, link.origin_entry
                ),
            });
        }
        let dest_conv = link.destination_conversation.to_string();
        check_ref("conversation", &dest_conv, conversations, context.to_string(), errors);
        if let Some(ids) = entries.get(&link.destination_conversation) {
            check_ref(
                "entry",
                &link.destination_entry.to_string(),
                ids,
                format!("{context} link into conversation {dest_conv}"),
                errors,
            );
        }
        if link.is_connector && !link.leaves_conversation() && link.destination_entry != 0 {
            errors.push(ValidationError::InvalidValue {
                context: format!("{context} connector link does not target a start entry"),
            });
        }
    }
}

fn track_ids(
    kind: &'static str,
    ids: impl Iterator<Item = String>,
    set: &mut HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    for id in ids {
        if !set.insert(id.clone()) {
            errors.push(ValidationError::DuplicateId { kind, id });
        }
    }
}

fn check_ref(kind: &'static str, id: &str, set: &HashSet<String>, context: String, errors: &mut Vec<ValidationError>) {
    if !set.contains(id) {
        errors.push(ValidationError::MissingReference {
            kind,
            id: id.to_string(),
            context,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(conv: DbId, id: DbId, title: &str) -> DialogueEntry {
        DialogueEntry {
            id,
            conversation_id: conv,
            title: title.into(),
            actor_id: 2,
            conversant_id: 1,
            ..DialogueEntry::default()
        }
    }

    fn base_db() -> DialogueDatabase {
        let mut start = entry(1, 0, "START");
        start.outgoing_links.push(Link::new((1, 0), (1, 1)));
        DialogueDatabase {
            actors: vec![
                Actor {
                    id: 1,
                    name: "Player".into(),
                    is_player: true,
                    ..Actor::default()
                },
                Actor {
                    id: 2,
                    name: "NPC".into(),
                    ..Actor::default()
                },
            ],
            conversations: vec![Conversation {
                id: 1,
                title: "Start".into(),
                actor_id: 1,
                conversant_id: 2,
                entries: vec![start, entry(1, 1, "Run Line")],
            }],
            ..DialogueDatabase::default()
        }
    }

    #[test]
    fn clean_database_has_no_errors() {
        assert_eq!(validate_database(&base_db()), Vec::new());
    }

    #[test]
    fn dangling_link_is_reported() {
        let mut db = base_db();
        db.conversations[0].entries[1]
            .outgoing_links
            .push(Link::new((1, 1), (9, 0)).connector());
        let errors = validate_database(&db);
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::MissingReference { kind: "conversation", id, .. } if id == "9"
        )));
    }

    #[test]
    fn duplicate_entry_and_missing_start_are_reported() {
        let mut db = base_db();
        db.conversations[0].entries[0].id = 1;
        db.conversations[0].entries[0].outgoing_links.clear();
        let errors = validate_database(&db);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::DuplicateId { kind: "entry", .. })));
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::InvalidValue { context } if context.contains("no start entry")))
        );
    }

    #[test]
    fn link_origin_mismatch_is_reported() {
        let mut db = base_db();
        db.conversations[0].entries[1]
            .outgoing_links
            .push(Link::new((1, 0), (1, 0)));
        let errors = validate_database(&db);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("holds a link from 1:0"));
    }

    #[test]
    fn missing_actor_is_reported() {
        let mut db = base_db();
        db.conversations[0].entries[1].actor_id = 42;
        let errors = validate_database(&db);
        assert_eq!(
            errors,
            vec![ValidationError::MissingReference {
                kind: "actor",
                id: "42".into(),
                context: "conversation 'Start' entry 1 'Run Line'".into(),
            }]
        );
    }
}

use log::debug;
use yarn_data::{Conversation, DbId};

use super::titles;

/// Remove the placeholder behind each run-node entry when nothing hangs off it.
///
/// Returns how many placeholders were removed. Running it again removes nothing.
pub fn cull_unreachable_entries(conversation: &mut Conversation) -> usize {
    let run_nodes: Vec<DbId> = conversation.entries_titled(titles::RUN_NODE).map(|e| e.id).collect();
    let mut culled = 0;
    for run_node in run_nodes {
        let Some(placeholder) = empty_placeholder(conversation, run_node) else {
            continue;
        };
        if let Some(entry) = conversation.entry_mut(run_node) {
            entry.outgoing_links.retain(|link| {
                link.leaves_conversation() || link.destination_entry != placeholder
            });
        }
        conversation.entries.retain(|e| e.id != placeholder);
        debug!(
            "conversation '{}': culled unreachable entry {placeholder} after run node {run_node}",
            conversation.title
        );
        culled += 1;
    }
    culled
}

/// The run node's placeholder, if it has no outgoing links.
fn empty_placeholder(conversation: &Conversation, run_node: DbId) -> Option<DbId> {
    conversation
        .entry(run_node)?
        .outgoing_links
        .iter()
        .filter(|link| !link.leaves_conversation())
        .filter_map(|link| conversation.entry(link.destination_entry))
        .find(|entry| entry.title == titles::UNREACHABLE_ENTRY)
        .filter(|entry| entry.outgoing_links.is_empty())
        .map(|entry| entry.id)
}

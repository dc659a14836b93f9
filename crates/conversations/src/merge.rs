//! Conversation merge engine.
//!
//! Reconciles a stored conversation with an incoming full-replacement or
//! delta payload. Editing message k discards every message that causally
//! followed k (truncation-on-edit); the replacement suffix is appended
//! in order, de-duplicated by id so re-applying an identical delta is a
//! no-op.

use std::collections::HashSet;

use cg_domain::conversation::{Conversation, ConversationDelta, IncomingConversation};
use cg_domain::error::{Error, Result};

/// Merge an incoming payload onto stored state and return the canonical
/// conversation for persistence.
///
/// A full conversation becomes canonical verbatim. A delta locates its
/// edit anchor: present at index k ⇒ stored messages truncate to
/// `[0, k)` before the suffix is appended; absent ⇒ pure append. The
/// delta's metadata overwrites the corresponding stored fields.
///
/// Errors:
/// - [`Error::MergeConflict`] when the anchor id occurs more than once
///   in storage (unresolvable) — the stored conversation is untouched;
/// - [`Error::Validation`] for a delta against no stored state.
pub fn merge(
    stored: Option<Conversation>,
    incoming: IncomingConversation,
) -> Result<Conversation> {
    match incoming {
        IncomingConversation::Full(conversation) => Ok(conversation),
        IncomingConversation::Delta(delta) => {
            let Some(stored) = stored else {
                return Err(Error::Validation(format!(
                    "delta references unknown conversation {}",
                    delta.id
                )));
            };
            apply_delta(stored, delta)
        }
    }
}

fn apply_delta(mut stored: Conversation, delta: ConversationDelta) -> Result<Conversation> {
    if let Some(anchor) = &delta.earliest_edited_message_id {
        let occurrences = stored.messages.iter().filter(|m| &m.id == anchor).count();
        if occurrences > 1 {
            return Err(Error::MergeConflict(format!(
                "edit anchor {anchor} occurs {occurrences} times in conversation {}",
                stored.id
            )));
        }
        if let Some(k) = stored.messages.iter().position(|m| &m.id == anchor) {
            // Editing message k invalidates k and all downstream history.
            stored.messages.truncate(k);
        }
        // Anchor absent from storage ⇒ pure append.
    }

    let mut retained_ids: HashSet<String> =
        stored.messages.iter().map(|m| m.id.clone()).collect();

    for message in delta.messages_delta {
        if retained_ids.contains(&message.id) {
            // Re-applied delta (or caller-side id collision) — skip so
            // the merge stays idempotent under message-id equality.
            tracing::debug!(
                conversation = %stored.id,
                message = %message.id,
                "skipping already-present delta message"
            );
            continue;
        }
        retained_ids.insert(message.id.clone());
        stored.messages.push(message);
    }

    let meta = delta.conversation_meta;
    if let Some(name) = meta.name {
        stored.name = name;
    }
    if let Some(model) = meta.model {
        stored.model = model;
    }
    if let Some(prompt) = meta.system_prompt {
        stored.system_prompt = prompt;
    }
    if let Some(temperature) = meta.temperature {
        stored.temperature = temperature.clamp(0.0, 1.0);
    }
    if let Some(folder_id) = meta.folder_id {
        stored.folder_id = Some(folder_id);
    }

    Ok(stored)
}

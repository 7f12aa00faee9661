//! Edit snapshots and before/after views over a paste's timeline.

use chrono::{DateTime, Utc};

use crate::{Paste, PasteDiff, PasteHistory, PasteHistoryCompact, Pasty};

use super::error::{ServiceError, ServiceResult};
use super::ids::generate_unique_id;

fn edit_not_found() -> ServiceError {
    ServiceError::NotFound("Edit not found.".into())
}

/// Snapshots the current title and pasties, appends the snapshot, then installs the new state.
pub fn apply_edit(
    paste: &mut Paste,
    title: String,
    pasties: Vec<Pasty>,
    now: DateTime<Utc>,
) -> PasteHistory {
    let id = generate_unique_id(|candidate| paste.history.iter().any(|h| h.id == candidate));
    let snapshot = PasteHistory {
        id,
        edited_at: now,
        title: paste.title.clone(),
        pasties: paste.pasties.clone(),
    };
    paste.history.push(snapshot.clone());
    paste.title = title;
    paste.pasties = pasties;
    paste.edited_at = Some(now);
    snapshot
}

/// The state that followed history entry `index`: the next snapshot, or the live paste.
fn state_after(paste: &Paste, index: usize) -> PasteHistory {
    match paste.history.get(index + 1) {
        Some(next) => next.clone(),
        None => PasteHistory {
            id: String::new(),
            edited_at: paste.edited_at.unwrap_or(paste.created_at),
            title: paste.title.clone(),
            pasties: paste.pasties.clone(),
        },
    }
}

pub fn diff(paste: &Paste, history_id: &str) -> ServiceResult<PasteDiff> {
    let index = paste
        .history
        .iter()
        .position(|h| h.id == history_id)
        .ok_or_else(edit_not_found)?;

    Ok(PasteDiff {
        old: paste.history[index].clone(),
        new: state_after(paste, index),
        current: paste.clone(),
    })
}

/// The paste as it looked right before the given edit.
pub fn at_edit(mut paste: Paste, history_id: &str) -> ServiceResult<Paste> {
    let edit = paste
        .history
        .iter()
        .find(|h| h.id == history_id)
        .cloned()
        .ok_or_else(edit_not_found)?;
    paste.title = edit.title;
    paste.pasties = edit.pasties;
    Ok(paste)
}

/// Newest first.
pub fn compact(history: &[PasteHistory]) -> Vec<PasteHistoryCompact> {
    let mut entries: Vec<PasteHistoryCompact> = history
        .iter()
        .map(|h| PasteHistoryCompact {
            id: h.id.clone(),
            edited_at: h.edited_at,
        })
        .collect();
    entries.sort_by(|a, b| b.edited_at.cmp(&a.edited_at));
    entries
}

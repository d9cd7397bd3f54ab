//! States command implementation.

use itemsync_core::SyncState;
use serde::Serialize;

/// One row of the transition table.
#[derive(Debug, Serialize)]
pub struct StateInfo {
    /// State name.
    pub state: String,
    /// State after a local edit.
    pub after_edit: String,
    /// State after a local delete.
    pub after_local_delete: String,
    /// Whether the state needs manual resolution.
    pub conflict: bool,
    /// Whether the item exists only locally.
    pub local_only: bool,
}

/// Runs the states command.
pub fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let rows = table();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    println!(
        "{:<16}  {:<16}  {:<16}  {:<8}  Local only",
        "State", "After edit", "After delete", "Conflict"
    );
    for row in &rows {
        println!(
            "{:<16}  {:<16}  {:<16}  {:<8}  {}",
            row.state, row.after_edit, row.after_local_delete, row.conflict, row.local_only
        );
    }
    Ok(())
}

fn table() -> Vec<StateInfo> {
    SyncState::ALL
        .iter()
        .map(|state| StateInfo {
            state: state.to_string(),
            after_edit: state.after_edit().to_string(),
            after_local_delete: state.after_local_delete().to_string(),
            conflict: state.is_conflict(),
            local_only: state.is_local_only(),
        })
        .collect()
}

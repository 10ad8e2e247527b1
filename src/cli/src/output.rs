//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};
use cranberry_runtime::PlannedAction;

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// One row per planned action, in execution order.
pub fn actions_table(actions: &[PlannedAction]) -> Table {
    let mut table = new_table(&["#", "STAGE", "KIND", "NAME", "ACTION"]);
    for (i, action) in actions.iter().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            action.stage.to_string(),
            action.kind.to_string(),
            action.name.clone(),
            action.summary.clone(),
        ]);
    }
    table
}

use crate::bulkload::{self, BulkLoadConfig};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_descriptors_bulk_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let cfg: BulkLoadConfig = match serde_json::from_value(req.params.clone()) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };

    match bulkload::load_descriptors(conn, &cfg) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "filesSeen": summary.files_seen,
                "filesLoaded": summary.files_loaded,
                "skipped": summary.skipped
            }),
        ),
        Err(e) => err(&req.id, "bulk_load_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "descriptors.bulkLoad" => Some(handle_descriptors_bulk_load(state, req)),
        _ => None,
    }
}

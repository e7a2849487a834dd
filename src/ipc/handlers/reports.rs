use crate::exceptions;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_reports_exceptions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let summary = match exceptions::summarize(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    exceptions::log_summary(&summary);

    match serde_json::to_value(summary) {
        Ok(mut v) => {
            v["total"] = json!(summary.total());
            ok(&req.id, v)
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.exceptions" => Some(handle_reports_exceptions(state, req)),
        _ => None,
    }
}

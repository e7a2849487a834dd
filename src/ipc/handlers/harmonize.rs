use crate::harmonize::{self, HarmonizeError};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_harmonize_submissions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let source_system = match req.params.get("sourceSystem").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing sourceSystem", None),
    };
    let namespace = match req.params.get("namespace").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing namespace", None),
    };
    if namespace.is_empty() {
        return err(&req.id, "bad_params", "namespace must not be empty", None);
    }

    let source_system = match source_system.parse() {
        Ok(s) => s,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("{e}"),
                Some(json!({ "sourceSystem": source_system })),
            )
        }
    };

    match harmonize::harmonize_submissions(conn, source_system, &namespace) {
        Ok(outcome) => ok(
            &req.id,
            json!({
                "staged": outcome.staged,
                "synthesized": outcome.synthesized,
                "inserted": outcome.inserted,
                "updated": outcome.updated,
                "deleted": outcome.deleted
            }),
        ),
        Err(e @ HarmonizeError::UnknownSourceSystem(_)) => {
            err(&req.id, "bad_params", e.to_string(), None)
        }
        Err(HarmonizeError::MissingDescriptor { namespace, code }) => err(
            &req.id,
            "missing_descriptor",
            format!("no descriptor for code '{code}'"),
            Some(json!({ "namespace": namespace, "code": code })),
        ),
        Err(HarmonizeError::Db(e)) => err(&req.id, "db_error", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "harmonize.submissions" => Some(handle_harmonize_submissions(state, req)),
        _ => None,
    }
}

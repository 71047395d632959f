use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!(state.settings))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    // Patch a copy so a rejected update leaves the live settings alone.
    let mut next = state.settings.clone();
    if let Err(msg) = next.apply_patch(&req.params) {
        return err(&req.id, "bad_params", msg, None);
    }
    state.settings = next;
    log::info!("settings updated");
    ok(&req.id, json!(state.settings))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

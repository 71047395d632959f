pub mod core;
pub mod grades;
pub mod rankings;
pub mod reports;
pub mod setup;

use crate::calc::{self, DisplayFilters};
use crate::grades::GradeBook;
use crate::ipc::error::{calc_err, err};
use crate::ipc::types::{AppState, Request};

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let v = req.params.get(key);
    let s = match v {
        Some(serde_json::Value::String(s)) => Some(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    s.filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must be string or null", key),
                None,
            )),
        },
    }
}

fn loaded_book<'a>(state: &'a AppState, req: &Request) -> Result<&'a GradeBook, serde_json::Value> {
    state
        .book
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_grades", "load grades first", None))
}

fn parse_filters(req: &Request) -> Result<DisplayFilters, serde_json::Value> {
    calc::parse_display_filters(req.params.get("filters")).map_err(|e| calc_err(&req.id, e))
}

use crate::calc;
use crate::grades::parse_grade_book;
use crate::ipc::error::{calc_err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_grades_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let book = match parse_grade_book(&req.params) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("grades.load rejected: {}", e.message);
            return calc_err(&req.id, e);
        }
    };

    let terms = calc::distinct_terms(&book.entries);
    let ungraded = book.ungraded_entry_count();
    let unweighted = book.unweighted_entry_count();
    if unweighted > 0 {
        log::warn!(
            "{} grade entries have no usable coefficient and are left out of averages",
            unweighted
        );
    }
    let hash = match book.snapshot_hash() {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };
    log::info!(
        "loaded {} grade entries for {} students ({} terms)",
        book.entries.len(),
        book.students.len(),
        terms.len()
    );

    let result = json!({
        "records": book.entries.len(),
        "students": book.students.len(),
        "subjects": book.subjects.len(),
        "terms": terms,
        "ungradedEntries": ungraded,
        "unweightedEntries": unweighted,
        "snapshotHash": hash,
    });
    state.book = Some(book);
    state.snapshot_hash = Some(hash);
    ok(&req.id, result)
}

fn handle_grades_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.book = None;
    state.snapshot_hash = None;
    ok(&req.id, json!({ "cleared": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.load" => Some(handle_grades_load(state, req)),
        "grades.clear" => Some(handle_grades_clear(state, req)),
        _ => None,
    }
}

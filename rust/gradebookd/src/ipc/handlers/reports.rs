use super::{loaded_book, optional_str, parse_filters, required_str};
use crate::calc;
use crate::grades::StudentId;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report;
use chrono::NaiveDate;
use serde_json::json;
use std::path::PathBuf;

fn parse_issued_on(req: &Request) -> Result<NaiveDate, serde_json::Value> {
    match optional_str(req, "issuedOn")? {
        None => Ok(chrono::Local::now().date_naive()),
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| {
            err(
                &req.id,
                "bad_params",
                "issuedOn must be a YYYY-MM-DD date",
                Some(json!({ "issuedOn": s })),
            )
        }),
    }
}

fn handle_reports_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let book = match loaded_book(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filters = match parse_filters(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match optional_str(req, "outPath") {
        Ok(v) => v.map(PathBuf::from),
        Err(e) => return e,
    };

    let ranked = calc::compute_rankings(book);
    let rows = filters.apply(&ranked.students);
    let csv = match report::render_csv(&ranked.terms, &rows) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };

    if let Some(path) = out_path.as_ref() {
        if let Err(e) = report::write_text_file(path, &csv) {
            log::warn!("csv export failed: {:#}", e);
            return err(
                &req.id,
                "export_failed",
                format!("{:#}", e),
                Some(json!({ "path": path.to_string_lossy() })),
            );
        }
        log::info!("wrote {} rows to {}", rows.len(), path.to_string_lossy());
    }

    ok(
        &req.id,
        json!({
            "csv": csv,
            "rowCount": rows.len(),
            "terms": ranked.terms,
            "path": out_path.map(|p| p.to_string_lossy().to_string()),
        }),
    )
}

fn handle_reports_bulletin(state: &mut AppState, req: &Request) -> serde_json::Value {
    let book = match loaded_book(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => StudentId(v),
        Err(e) => return e,
    };
    let term = match optional_str(req, "term") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let issued_on = match parse_issued_on(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ranked = calc::compute_rankings(book);
    let Some(model) = report::bulletin_for(
        book,
        &ranked,
        &student_id,
        term.as_deref(),
        &state.settings,
        issued_on,
    ) else {
        return err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "studentId": student_id })),
        );
    };
    let html = report::render_bulletin_html(&model);
    ok(&req.id, json!({ "model": model, "html": html }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.csv" => Some(handle_reports_csv(state, req)),
        "reports.bulletin" => Some(handle_reports_bulletin(state, req)),
        _ => None,
    }
}

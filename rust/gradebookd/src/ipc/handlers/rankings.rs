use super::{loaded_book, parse_filters};
use crate::calc::{self, StudentSummary};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::cmp::Ordering;

const SORT_KEYS: &[&str] = &[
    "rank",
    "name",
    "overallAverage",
    "registrationNumber",
    "className",
];

#[derive(Debug, Clone)]
struct RowsQuery {
    sort_by: String,
    sort_dir: String,
    page: usize,
    page_size: usize,
}

fn parse_sort_by(v: Option<&serde_json::Value>) -> Result<String, String> {
    let Some(value) = v else {
        return Ok("rank".to_string());
    };
    let Some(raw) = value.as_str() else {
        return Err("query.sortBy must be a string".to_string());
    };
    if SORT_KEYS.iter().any(|k| *k == raw) {
        Ok(raw.to_string())
    } else {
        Err(format!("query.sortBy must be one of: {}", SORT_KEYS.join(", ")))
    }
}

fn parse_sort_dir(v: Option<&serde_json::Value>) -> Result<String, String> {
    let Some(value) = v else {
        return Ok("asc".to_string());
    };
    let Some(raw) = value.as_str() else {
        return Err("query.sortDir must be a string".to_string());
    };
    if raw.eq_ignore_ascii_case("asc") {
        Ok("asc".to_string())
    } else if raw.eq_ignore_ascii_case("desc") {
        Ok("desc".to_string())
    } else {
        Err("query.sortDir must be one of: asc, desc".to_string())
    }
}

fn parse_page(v: Option<&serde_json::Value>) -> Result<usize, String> {
    let Some(value) = v else {
        return Ok(1);
    };
    let Some(page) = value.as_u64() else {
        return Err("query.page must be a positive integer".to_string());
    };
    if page == 0 {
        return Err("query.page must be >= 1".to_string());
    }
    Ok(page as usize)
}

fn parse_page_size(v: Option<&serde_json::Value>) -> Result<usize, String> {
    let Some(value) = v else {
        return Ok(50);
    };
    let Some(size) = value.as_u64() else {
        return Err("query.pageSize must be a positive integer".to_string());
    };
    if size == 0 || size > 500 {
        return Err("query.pageSize must be in range 1..=500".to_string());
    }
    Ok(size as usize)
}

fn parse_rows_query(req: &Request) -> Result<RowsQuery, serde_json::Value> {
    let bad = |msg: String| err(&req.id, "bad_params", msg, None);
    let query = match req.params.get("query") {
        None | Some(serde_json::Value::Null) => serde_json::Map::new(),
        Some(serde_json::Value::Object(m)) => m.clone(),
        Some(_) => return Err(bad("query must be an object".to_string())),
    };

    Ok(RowsQuery {
        sort_by: parse_sort_by(query.get("sortBy")).map_err(bad)?,
        sort_dir: parse_sort_dir(query.get("sortDir")).map_err(bad)?,
        page: parse_page(query.get("page")).map_err(bad)?,
        page_size: parse_page_size(query.get("pageSize")).map_err(bad)?,
    })
}

fn compare_rows(sort_by: &str, a: &StudentSummary, b: &StudentSummary) -> Ordering {
    match sort_by {
        "name" => a
            .student
            .display_name()
            .to_lowercase()
            .cmp(&b.student.display_name().to_lowercase()),
        "overallAverage" => a
            .overall_average
            .partial_cmp(&b.overall_average)
            .unwrap_or(Ordering::Equal),
        "registrationNumber" => a
            .student
            .registration_number
            .cmp(&b.student.registration_number),
        "className" => a.student.class_name().cmp(&b.student.class_name()),
        _ => a.rank.cmp(&b.rank),
    }
}

fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Vec<T> {
    let start = (page - 1).saturating_mul(page_size);
    if start >= items.len() {
        return Vec::new();
    }
    let end = (start + page_size).min(items.len());
    items[start..end].to_vec()
}

fn handle_rankings_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let book = match loaded_book(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filters = match parse_filters(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let report = calc::compute_rankings(book);
    let students = filters.apply(&report.students);
    ok(
        &req.id,
        json!({
            "terms": report.terms,
            "students": students,
        }),
    )
}

fn handle_rankings_rows(state: &mut AppState, req: &Request) -> serde_json::Value {
    let book = match loaded_book(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filters = match parse_filters(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let query = match parse_rows_query(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let report = calc::compute_rankings(book);
    let mut rows = filters.apply(&report.students);
    // Stable sort: equal keys keep the ranked order.
    rows.sort_by(|a, b| {
        let ord = compare_rows(&query.sort_by, a, b);
        if query.sort_dir == "desc" {
            ord.reverse()
        } else {
            ord
        }
    });

    let total_rows = rows.len();
    let paged = paginate(&rows, query.page, query.page_size);

    ok(
        &req.id,
        json!({
            "terms": report.terms,
            "rows": paged,
            "totalRows": total_rows,
            "page": query.page,
            "pageSize": query.page_size,
            "sortBy": query.sort_by,
            "sortDir": query.sort_dir,
            "appliedFilters": filters,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rankings.compute" => Some(handle_rankings_compute(state, req)),
        "rankings.rows" => Some(handle_rankings_rows(state, req)),
        _ => None,
    }
}

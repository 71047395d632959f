use crate::calc::{self, CalcError, RankedReport, StudentSummary, SubjectAverage, TermAverage};
use crate::grades::{GradeBook, StudentId};
use crate::settings::Settings;
use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::Path;

/// Spreadsheet tools sniff this to pick UTF-8.
pub const UTF8_BOM: &str = "\u{feff}";

const MISSING: &str = "-";

fn fmt_avg(v: f64) -> String {
    format!("{:.2}", v)
}

fn fmt_opt_avg(v: Option<f64>) -> String {
    v.map(fmt_avg).unwrap_or_else(|| MISSING.to_string())
}

pub fn csv_header(terms: &[String]) -> Vec<String> {
    let mut cols = vec![
        "Registration number".to_string(),
        "Surname".to_string(),
        "Given name".to_string(),
        "Sex".to_string(),
        "Class".to_string(),
    ];
    cols.extend(terms.iter().cloned());
    cols.push("Overall average".to_string());
    cols.push("Rank".to_string());
    cols.push("Appreciation".to_string());
    cols
}

fn csv_row(terms: &[String], s: &StudentSummary) -> Vec<String> {
    let st = &s.student;
    let mut row = vec![
        st.registration_number.clone().unwrap_or_default(),
        st.last_name.clone(),
        st.first_name.clone(),
        st.sex.clone().unwrap_or_default(),
        st.class_name().unwrap_or_default().to_string(),
    ];
    // A term the student never sat shows "-"; a sat-but-ungraded term shows 0.00.
    row.extend(terms.iter().map(|t| fmt_opt_avg(s.term_average(t))));
    row.push(fmt_avg(s.overall_average));
    row.push(s.rank.to_string());
    row.push(s.appreciation.label().to_string());
    row
}

/// Comma-separated, BOM-prefixed export of the ranked rows, one term column per label.
pub fn render_csv(terms: &[String], rows: &[&StudentSummary]) -> Result<String, CalcError> {
    let render_err = |e: csv::Error| CalcError::new("render_failed", e.to_string());

    let mut wtr = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(UTF8_BOM.as_bytes().to_vec());
    wtr.write_record(csv_header(terms)).map_err(render_err)?;
    for s in rows {
        wtr.write_record(csv_row(terms, s)).map_err(render_err)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| CalcError::new("render_failed", e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CalcError::new("render_failed", e.to_string()))
}

pub fn write_text_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Bulletin
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletinHeader {
    pub school_name: Option<String>,
    pub academic_year: Option<String>,
    pub issued_on: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletinModel {
    pub header: BulletinHeader,
    pub student: StudentSummary,
    /// Restricts the subject table only; averages, rank and appreciation cover all terms.
    pub term: Option<String>,
    pub subjects: Vec<SubjectAverage>,
    pub weighted_mean: Option<f64>,
}

pub fn format_issue_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Builds the per-student bulletin. `summary` comes from the ranking pass; the subject
/// table is a fresh roll-up over the student's own rows.
pub fn build_bulletin(
    book: &GradeBook,
    summary: &StudentSummary,
    term: Option<&str>,
    settings: &Settings,
    issued_on: NaiveDate,
) -> BulletinModel {
    let rollup = calc::aggregate_by_subject(book, &summary.student.id, term);
    BulletinModel {
        header: BulletinHeader {
            school_name: settings.school_name.clone(),
            academic_year: settings.academic_year.clone(),
            issued_on: format_issue_date(issued_on),
        },
        student: summary.clone(),
        term: term.map(|t| t.to_string()),
        subjects: rollup.subjects,
        weighted_mean: rollup.weighted_mean,
    }
}

pub fn bulletin_for(
    book: &GradeBook,
    ranked: &RankedReport,
    student_id: &StudentId,
    term: Option<&str>,
    settings: &Settings,
    issued_on: NaiveDate,
) -> Option<BulletinModel> {
    let summary = ranked.student(student_id)?;
    Some(build_bulletin(book, summary, term, settings, issued_on))
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn push_row(html: &mut String, cells: &[String]) {
    html.push_str("<tr>");
    for c in cells {
        html.push_str("<td>");
        html.push_str(&escape_html(c));
        html.push_str("</td>");
    }
    html.push_str("</tr>\n");
}

fn term_rows(html: &mut String, terms: &[TermAverage]) {
    if terms.is_empty() {
        return;
    }
    html.push_str("<table class=\"terms\">\n<thead><tr><th>Term</th><th>Average</th></tr></thead>\n<tbody>\n");
    for t in terms {
        push_row(html, &[t.term.clone(), fmt_avg(t.average)]);
    }
    html.push_str("</tbody>\n</table>\n");
}

/// Printable markup for one bulletin. Every piece of text is escaped.
pub fn render_bulletin_html(model: &BulletinModel) -> String {
    let st = &model.student.student;
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>");
    html.push_str(&escape_html(&format!("Bulletin - {}", st.display_name())));
    html.push_str("</title></head>\n<body>\n<header>\n");
    if let Some(school) = model.header.school_name.as_deref() {
        html.push_str(&format!("<h1>{}</h1>\n", escape_html(school)));
    }
    if let Some(year) = model.header.academic_year.as_deref() {
        html.push_str(&format!("<p class=\"year\">{}</p>\n", escape_html(year)));
    }
    html.push_str(&format!(
        "<p class=\"issued\">Issued on {}</p>\n</header>\n",
        escape_html(&model.header.issued_on)
    ));

    html.push_str("<section class=\"student\">\n");
    let identity = [
        ("Name", Some(st.display_name())),
        ("Registration number", st.registration_number.clone()),
        ("Sex", st.sex.clone()),
        ("Class", st.class_name().map(|c| c.to_string())),
        ("Term", model.term.clone()),
    ];
    for (label, value) in identity {
        if let Some(v) = value {
            html.push_str(&format!(
                "<p><strong>{}:</strong> {}</p>\n",
                label,
                escape_html(&v)
            ));
        }
    }
    html.push_str("</section>\n");

    html.push_str("<table class=\"subjects\">\n<thead><tr><th>Subject</th><th>Coefficient</th><th>Average</th></tr></thead>\n<tbody>\n");
    for s in &model.subjects {
        push_row(
            &mut html,
            &[
                s.name.clone(),
                s.coefficient
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| MISSING.to_string()),
                fmt_opt_avg(s.average),
            ],
        );
    }
    html.push_str("</tbody>\n<tfoot>");
    push_row(
        &mut html,
        &[
            "Weighted mean".to_string(),
            String::new(),
            fmt_opt_avg(model.weighted_mean),
        ],
    );
    html.push_str("</tfoot>\n</table>\n");

    term_rows(&mut html, &model.student.term_averages);

    let summary = &model.student;
    html.push_str("<section class=\"result\">\n");
    html.push_str(&format!(
        "<p><strong>Overall average:</strong> {}</p>\n",
        fmt_avg(summary.overall_average)
    ));
    html.push_str(&format!(
        "<p><strong>Rank:</strong> {} / {}</p>\n",
        summary.rank, summary.rank_out_of
    ));
    html.push_str(&format!(
        "<p><strong>Appreciation:</strong> {}</p>\n",
        escape_html(summary.appreciation.label())
    ));
    html.push_str("</section>\n</body>\n</html>\n");
    html
}

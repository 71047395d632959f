use crate::grades::{ClassId, GradeBook, GradeEntry, StudentId, StudentRef, SubjectId};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

/// Half-away-from-zero rounding to 2 decimals, the precision every average is reported at.
pub fn round_off_2_decimals(x: f64) -> f64 {
    (100.0 * x).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Insertion-ordered multi-map. A key can be registered with an empty group, which is
/// distinct from the key being absent.
#[derive(Debug)]
struct OrderedGroups<K, V> {
    index: HashMap<K, usize>,
    groups: Vec<(K, Vec<V>)>,
}

impl<K: Eq + Hash + Clone, V> OrderedGroups<K, V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            groups: Vec::new(),
        }
    }

    fn ensure(&mut self, key: &K) -> usize {
        if let Some(&i) = self.index.get(key) {
            return i;
        }
        let i = self.groups.len();
        self.index.insert(key.clone(), i);
        self.groups.push((key.clone(), Vec::new()));
        i
    }

    fn push(&mut self, key: &K, value: V) {
        let i = self.ensure(key);
        self.groups[i].1.push(value);
    }

    fn into_groups(self) -> Vec<(K, Vec<V>)> {
        self.groups
    }
}

// ---------------------------------------------------------------------------
// Term roll-up
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermAverage {
    pub term: String,
    pub average: f64,
    /// Rows recorded for this term, graded or not.
    pub entry_count: usize,
    /// Rows that carried both a value and a usable coefficient.
    pub graded_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentAverages {
    pub student: StudentRef,
    pub term_averages: Vec<TermAverage>,
    pub overall_average: f64,
}

impl StudentAverages {
    /// `None` when the student has no row at all for `term`; `Some(0.0)` when rows
    /// exist but none of them is gradable.
    #[cfg(test)]
    pub fn term_average(&self, term: &str) -> Option<f64> {
        self.term_averages
            .iter()
            .find(|t| t.term == term)
            .map(|t| t.average)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermRollup {
    /// Every distinct term label in the snapshot, in first-seen order.
    pub terms: Vec<String>,
    pub students: Vec<StudentAverages>,
}

/// Coefficient-weighted mean of one term's rows. Rows without a value or a usable
/// coefficient drop out of both numerator and denominator.
pub fn term_average<'a, I>(entries: I) -> TermAverage
where
    I: IntoIterator<Item = &'a GradeEntry>,
{
    let mut term = String::new();
    let mut entry_count = 0usize;
    let mut graded_count = 0usize;
    let mut weighted_sum = 0.0f64;
    let mut coef_sum = 0u64;

    for e in entries {
        if entry_count == 0 {
            term = e.term.clone();
        }
        entry_count += 1;
        if let Some((value, coef)) = e.weighted_value() {
            graded_count += 1;
            weighted_sum += value * f64::from(coef);
            coef_sum += u64::from(coef);
        }
    }

    let average = if coef_sum > 0 {
        round_off_2_decimals(weighted_sum / coef_sum as f64)
    } else {
        0.0
    };

    TermAverage {
        term,
        average,
        entry_count,
        graded_count,
    }
}

/// Plain mean over term averages; terms are not re-weighted by how many rows they hold.
pub fn overall_average(term_averages: &[TermAverage]) -> f64 {
    if term_averages.is_empty() {
        return 0.0;
    }
    let sum: f64 = term_averages.iter().map(|t| t.average).sum();
    round_off_2_decimals(sum / term_averages.len() as f64)
}

pub fn distinct_terms(entries: &[GradeEntry]) -> Vec<String> {
    let mut seen: OrderedGroups<&str, ()> = OrderedGroups::new();
    for e in entries {
        seen.ensure(&e.term.as_str());
    }
    seen.into_groups()
        .into_iter()
        .map(|(t, _)| t.to_string())
        .collect()
}

/// Groups the snapshot by student, then by term, and derives per-term and overall
/// averages. Every student in the snapshot yields exactly one row, including roster
/// students with no grade rows at all.
pub fn aggregate_by_term(book: &GradeBook) -> TermRollup {
    let terms = distinct_terms(&book.entries);

    let mut by_student: OrderedGroups<&StudentId, &GradeEntry> = OrderedGroups::new();
    for s in &book.students {
        by_student.ensure(&&s.id);
    }
    for e in &book.entries {
        by_student.push(&&e.student_id, e);
    }

    let mut students = Vec::with_capacity(book.students.len());
    for (student_id, entries) in by_student.into_groups() {
        let Some(student) = book.student(student_id) else {
            continue;
        };

        let mut by_term: OrderedGroups<&str, &GradeEntry> = OrderedGroups::new();
        for e in entries {
            by_term.push(&e.term.as_str(), e);
        }
        let mut term_averages: Vec<TermAverage> = by_term
            .into_groups()
            .into_iter()
            .map(|(_, rows)| term_average(rows))
            .collect();
        term_averages.sort_by_key(|t| terms.iter().position(|x| *x == t.term));

        let overall_average = overall_average(&term_averages);
        students.push(StudentAverages {
            student: student.clone(),
            term_averages,
            overall_average,
        });
    }

    TermRollup { terms, students }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Appreciation {
    Excellent,
    #[serde(rename = "Very good")]
    VeryGood,
    Good,
    Fair,
    Insufficient,
}

impl Appreciation {
    pub const ALL: [Appreciation; 5] = [
        Appreciation::Excellent,
        Appreciation::VeryGood,
        Appreciation::Good,
        Appreciation::Fair,
        Appreciation::Insufficient,
    ];

    pub fn from_average(average: f64) -> Self {
        if average >= 16.0 {
            Appreciation::Excellent
        } else if average >= 14.0 {
            Appreciation::VeryGood
        } else if average >= 12.0 {
            Appreciation::Good
        } else if average >= 10.0 {
            Appreciation::Fair
        } else {
            Appreciation::Insufficient
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Appreciation::Excellent => "Excellent",
            Appreciation::VeryGood => "Very good",
            Appreciation::Good => "Good",
            Appreciation::Fair => "Fair",
            Appreciation::Insufficient => "Insufficient",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        let t = s.trim();
        Self::ALL
            .into_iter()
            .find(|a| a.label().eq_ignore_ascii_case(t))
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    #[serde(flatten)]
    pub student: StudentRef,
    pub term_averages: Vec<TermAverage>,
    pub overall_average: f64,
    pub rank: u32,
    /// Size of the group the rank was computed in.
    pub rank_out_of: u32,
    pub appreciation: Appreciation,
}

impl StudentSummary {
    pub fn term_average(&self, term: &str) -> Option<f64> {
        self.term_averages
            .iter()
            .find(|t| t.term == term)
            .map(|t| t.average)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RankGroup {
    Class(ClassId),
    /// A student without a class is ranked alone.
    Unassigned(StudentId),
}

fn rank_group(student: &StudentRef) -> RankGroup {
    match student.class_id() {
        Some(c) => RankGroup::Class(c.clone()),
        None => RankGroup::Unassigned(student.id.clone()),
    }
}

/// Competition ranks ("1224") for averages already sorted descending.
pub fn competition_ranks(sorted_desc: &[f64]) -> Vec<u32> {
    let mut ranks = Vec::with_capacity(sorted_desc.len());
    let mut current = 0u32;
    for (pos, avg) in sorted_desc.iter().enumerate() {
        if pos == 0 || *avg != sorted_desc[pos - 1] {
            current = pos as u32 + 1;
        }
        ranks.push(current);
    }
    ranks
}

/// Classifies every student and ranks them within their class. Output is grouped by
/// class in first-seen order, best first inside each class. Exact ties keep input
/// order; no secondary key is applied.
pub fn rank_by_class(students: Vec<StudentAverages>) -> Vec<StudentSummary> {
    let mut groups: OrderedGroups<RankGroup, StudentAverages> = OrderedGroups::new();
    for s in students {
        let key = rank_group(&s.student);
        groups.push(&key, s);
    }

    let mut out = Vec::new();
    for (_, mut members) in groups.into_groups() {
        members.sort_by(|a, b| {
            b.overall_average
                .partial_cmp(&a.overall_average)
                .unwrap_or(Ordering::Equal)
        });
        let averages: Vec<f64> = members.iter().map(|m| m.overall_average).collect();
        let ranks = competition_ranks(&averages);
        let out_of = members.len() as u32;
        for (m, rank) in members.into_iter().zip(ranks) {
            out.push(StudentSummary {
                appreciation: Appreciation::from_average(m.overall_average),
                student: m.student,
                term_averages: m.term_averages,
                overall_average: m.overall_average,
                rank,
                rank_out_of: out_of,
            });
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedReport {
    pub terms: Vec<String>,
    pub students: Vec<StudentSummary>,
}

impl RankedReport {
    pub fn student(&self, id: &StudentId) -> Option<&StudentSummary> {
        self.students.iter().find(|s| &s.student.id == id)
    }
}

/// Full pass: term roll-up, classification, class-scoped ranking.
pub fn compute_rankings(book: &GradeBook) -> RankedReport {
    let rollup = aggregate_by_term(book);
    RankedReport {
        terms: rollup.terms,
        students: rank_by_class(rollup.students),
    }
}

// ---------------------------------------------------------------------------
// Subject roll-up (bulletin)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject_id: SubjectId,
    pub name: String,
    pub coefficient: Option<u32>,
    /// Mean of this student's own recorded values for the subject.
    pub average: Option<f64>,
    pub entry_count: usize,
    pub graded_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRollup {
    pub subjects: Vec<SubjectAverage>,
    /// Coefficient-weighted mean over subjects that have both an average and a coefficient.
    pub weighted_mean: Option<f64>,
}

/// Groups one student's rows by subject across terms and sequences. Kept apart from
/// [`aggregate_by_term`]: this axis feeds the bulletin table only, never ranking.
pub fn aggregate_by_subject(
    book: &GradeBook,
    student_id: &StudentId,
    term: Option<&str>,
) -> SubjectRollup {
    let mut by_subject: OrderedGroups<&SubjectId, &GradeEntry> = OrderedGroups::new();
    for e in book.entries_for(student_id) {
        if term.map(|t| t == e.term).unwrap_or(true) {
            by_subject.push(&&e.subject_id, e);
        }
    }

    let mut subjects = Vec::new();
    let mut weighted_sum = 0.0f64;
    let mut coef_sum = 0u64;
    for (subject_id, rows) in by_subject.into_groups() {
        let values: Vec<f64> = rows.iter().filter_map(|e| e.value).collect();
        let mean = if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        };
        // The student's own rows carry the coefficient their term averages used.
        let catalogue = book.subject(subject_id);
        let name = catalogue
            .map(|s| s.name.clone())
            .unwrap_or_else(|| subject_id.0.clone());
        let coefficient = rows
            .iter()
            .find_map(|e| e.coefficient)
            .or_else(|| catalogue.and_then(|s| s.coefficient));
        if let (Some(m), Some(c)) = (mean, coefficient) {
            weighted_sum += m * f64::from(c);
            coef_sum += u64::from(c);
        }
        subjects.push(SubjectAverage {
            subject_id: subject_id.clone(),
            name,
            coefficient,
            average: mean.map(round_off_2_decimals),
            entry_count: rows.len(),
            graded_count: values.len(),
        });
    }

    let weighted_mean = if coef_sum > 0 {
        Some(round_off_2_decimals(weighted_sum / coef_sum as f64))
    } else {
        None
    };
    SubjectRollup {
        subjects,
        weighted_mean,
    }
}

// ---------------------------------------------------------------------------
// Display filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayFilters {
    pub search: Option<String>,
    pub class_id: Option<String>,
    pub sex: Option<String>,
    pub status: Option<String>,
    pub appreciation: Option<Appreciation>,
}

impl DisplayFilters {
    pub fn matches(&self, s: &StudentSummary) -> bool {
        if let Some(needle) = self.search.as_ref() {
            let hay = [
                Some(s.student.last_name.as_str()),
                Some(s.student.first_name.as_str()),
                s.student.registration_number.as_deref(),
            ];
            let hit = hay
                .iter()
                .flatten()
                .any(|h| h.to_lowercase().contains(needle));
            if !hit {
                return false;
            }
        }
        if let Some(class_id) = self.class_id.as_ref() {
            if s.student.class_id().map(|c| c.as_str()) != Some(class_id.as_str()) {
                return false;
            }
        }
        if !matches_ci(self.sex.as_deref(), s.student.sex.as_deref()) {
            return false;
        }
        if !matches_ci(self.status.as_deref(), s.student.status.as_deref()) {
            return false;
        }
        if let Some(a) = self.appreciation {
            if s.appreciation != a {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, students: &'a [StudentSummary]) -> Vec<&'a StudentSummary> {
        students.iter().filter(|s| self.matches(s)).collect()
    }
}

fn matches_ci(wanted: Option<&str>, actual: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(w) => actual.map(|a| a.eq_ignore_ascii_case(w)).unwrap_or(false),
    }
}

fn parse_optional_filter(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<String>, CalcError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(CalcError::new(
                    "bad_params",
                    format!("filters.{} must be string or null", key),
                ));
            };
            let t = s.trim();
            if t.is_empty() || t.eq_ignore_ascii_case("ALL") {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
    }
}

pub fn parse_display_filters(
    raw: Option<&serde_json::Value>,
) -> Result<DisplayFilters, CalcError> {
    let Some(raw) = raw else {
        return Ok(DisplayFilters::default());
    };
    if raw.is_null() {
        return Ok(DisplayFilters::default());
    }
    let Some(obj) = raw.as_object() else {
        return Err(CalcError::new("bad_params", "filters must be an object"));
    };

    let search = match obj.get("search") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(CalcError::new(
                    "bad_params",
                    "filters.search must be string or null",
                ));
            };
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_lowercase())
            }
        }
    };

    let appreciation = match parse_optional_filter(obj, "appreciation")? {
        None => None,
        Some(label) => match Appreciation::from_label(&label) {
            Some(a) => Some(a),
            None => {
                let allowed: Vec<&str> = Appreciation::ALL.iter().map(|a| a.label()).collect();
                return Err(CalcError::new(
                    "bad_params",
                    format!("filters.appreciation must be one of: {}", allowed.join(", ")),
                ));
            }
        },
    };

    Ok(DisplayFilters {
        search,
        class_id: parse_optional_filter(obj, "classId")?,
        sex: parse_optional_filter(obj, "sex")?,
        status: parse_optional_filter(obj, "status")?,
        appreciation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grades::{ClassRef, SubjectRef};

    fn student(id: &str, class: Option<&str>) -> StudentRef {
        StudentRef {
            id: StudentId(id.to_string()),
            registration_number: Some(format!("REG-{}", id)),
            last_name: format!("Last{}", id),
            first_name: format!("First{}", id),
            sex: Some("F".to_string()),
            photo: None,
            status: Some("active".to_string()),
            class: class.map(|c| ClassRef {
                id: ClassId(c.to_string()),
                name: format!("Class {}", c),
            }),
        }
    }

    fn entry(student: &str, subject: &str, term: &str, value: Option<f64>, coef: Option<u32>) -> GradeEntry {
        GradeEntry {
            student_id: StudentId(student.to_string()),
            subject_id: SubjectId(subject.to_string()),
            term: term.to_string(),
            sequence: "Seq 1".to_string(),
            value,
            coefficient: coef,
        }
    }

    fn book(students: &[StudentRef], entries: Vec<GradeEntry>) -> GradeBook {
        let mut b = GradeBook::default();
        for s in students {
            b.add_student(s.clone());
        }
        for e in entries {
            b.add_subject(SubjectRef {
                id: e.subject_id.clone(),
                name: e.subject_id.0.to_uppercase(),
                coefficient: e.coefficient,
            });
            b.add_entry(e);
        }
        b
    }

    fn averages(id: &str, class: Option<&str>, overall: f64) -> StudentAverages {
        StudentAverages {
            student: student(id, class),
            term_averages: Vec::new(),
            overall_average: overall,
        }
    }

    #[test]
    fn round_off_2_decimals_half_away_from_zero() {
        assert_eq!(round_off_2_decimals(17.5), 17.5);
        assert_eq!(round_off_2_decimals(13.333333), 13.33);
        assert_eq!(round_off_2_decimals(13.336), 13.34);
        assert_eq!(round_off_2_decimals(0.0), 0.0);
    }

    #[test]
    fn term_average_weights_by_coefficient() {
        let rows = vec![
            entry("s1", "fr", "T1", Some(10.0), Some(1)),
            entry("s1", "math", "T1", Some(20.0), Some(3)),
        ];
        let t = term_average(&rows);
        assert_eq!(t.average, 17.5);
        assert_eq!(t.graded_count, 2);
    }

    #[test]
    fn term_average_ignores_null_values() {
        let base = vec![
            entry("s1", "fr", "T1", Some(11.0), Some(2)),
            entry("s1", "math", "T1", Some(15.5), Some(4)),
        ];
        let mut with_null = base.clone();
        with_null.push(entry("s1", "math", "T1", None, Some(4)));
        assert_eq!(term_average(&base).average, term_average(&with_null).average);
        assert_eq!(term_average(&with_null).entry_count, 3);
    }

    #[test]
    fn zero_or_missing_coefficient_is_excluded_not_fatal() {
        let rows = vec![
            entry("s1", "fr", "T1", Some(12.0), Some(2)),
            entry("s1", "bad", "T1", Some(2.0), Some(0)),
            entry("s1", "none", "T1", Some(4.0), None),
        ];
        assert_eq!(term_average(&rows).average, 12.0);
    }

    #[test]
    fn overall_is_plain_mean_of_term_averages() {
        // T1 has four rows, T2 one; each term still counts once.
        let b = book(
            &[student("s1", Some("c1"))],
            vec![
                entry("s1", "fr", "T1", Some(12.0), Some(1)),
                entry("s1", "fr", "T1", Some(12.0), Some(1)),
                entry("s1", "math", "T1", Some(12.0), Some(2)),
                entry("s1", "pe", "T1", Some(12.0), Some(1)),
                entry("s1", "fr", "T2", Some(16.0), Some(1)),
            ],
        );
        let rollup = aggregate_by_term(&b);
        assert_eq!(rollup.students[0].overall_average, 14.0);
    }

    #[test]
    fn term_with_only_null_values_is_zero_while_absent_term_is_none() {
        let b = book(
            &[student("s1", Some("c1")), student("s2", Some("c1"))],
            vec![
                entry("s1", "fr", "T1", Some(14.0), Some(2)),
                entry("s1", "fr", "T2", None, Some(2)),
                entry("s2", "fr", "T1", Some(8.0), Some(2)),
            ],
        );
        let rollup = aggregate_by_term(&b);
        assert_eq!(rollup.terms, vec!["T1".to_string(), "T2".to_string()]);

        let s1 = &rollup.students[0];
        assert_eq!(s1.term_average("T2"), Some(0.0));
        assert_eq!(s1.overall_average, 7.0);

        let s2 = &rollup.students[1];
        assert_eq!(s2.term_average("T2"), None);
        assert_eq!(s2.overall_average, 8.0);
    }

    #[test]
    fn duplicate_rows_all_contribute() {
        let rows = vec![
            entry("s1", "fr", "T1", Some(10.0), Some(1)),
            entry("s1", "fr", "T1", Some(10.0), Some(1)),
            entry("s1", "fr", "T1", Some(16.0), Some(1)),
        ];
        assert_eq!(term_average(&rows).average, 12.0);
    }

    #[test]
    fn student_without_rows_still_appears_as_insufficient() {
        let b = book(
            &[student("s1", Some("c1")), student("ghost", Some("c1"))],
            vec![entry("s1", "fr", "T1", Some(12.0), Some(1))],
        );
        let report = compute_rankings(&b);
        let ghost = report
            .student(&StudentId("ghost".into()))
            .expect("ghost row");
        assert_eq!(ghost.overall_average, 0.0);
        assert!(ghost.term_averages.is_empty());
        assert_eq!(ghost.appreciation, Appreciation::Insufficient);
        assert_eq!(ghost.rank, 2);
    }

    #[test]
    fn appreciation_bands_are_lower_inclusive() {
        assert_eq!(Appreciation::from_average(16.0), Appreciation::Excellent);
        assert_eq!(Appreciation::from_average(15.99), Appreciation::VeryGood);
        assert_eq!(Appreciation::from_average(14.0), Appreciation::VeryGood);
        assert_eq!(Appreciation::from_average(13.99), Appreciation::Good);
        assert_eq!(Appreciation::from_average(12.0), Appreciation::Good);
        assert_eq!(Appreciation::from_average(10.0), Appreciation::Fair);
        assert_eq!(Appreciation::from_average(9.99), Appreciation::Insufficient);
        assert_eq!(Appreciation::from_average(0.0), Appreciation::Insufficient);
    }

    #[test]
    fn appreciation_labels_round_trip() {
        for a in Appreciation::ALL {
            assert_eq!(Appreciation::from_label(a.label()), Some(a));
        }
        assert_eq!(Appreciation::from_label("very GOOD"), Some(Appreciation::VeryGood));
        assert_eq!(Appreciation::from_label("great"), None);
    }

    #[test]
    fn competition_ranking_skips_after_ties() {
        assert_eq!(competition_ranks(&[18.0, 15.0, 15.0, 12.0]), vec![1, 2, 2, 4]);
        assert_eq!(competition_ranks(&[10.0, 10.0, 10.0]), vec![1, 1, 1]);
        assert!(competition_ranks(&[]).is_empty());
    }

    #[test]
    fn ranking_sorts_descending_within_class() {
        let ranked = rank_by_class(vec![
            averages("a", Some("c1"), 12.0),
            averages("b", Some("c1"), 15.0),
            averages("c", Some("c1"), 18.0),
            averages("d", Some("c1"), 15.0),
        ]);
        let got: Vec<(&str, u32)> = ranked
            .iter()
            .map(|s| (s.student.id.as_str(), s.rank))
            .collect();
        // Ties keep input order: b before d.
        assert_eq!(got, vec![("c", 1), ("b", 2), ("d", 2), ("a", 4)]);
        assert!(ranked.iter().all(|s| s.rank_out_of == 4));
    }

    #[test]
    fn ranking_is_class_scoped() {
        let ranked = rank_by_class(vec![
            averages("a", Some("c1"), 17.0),
            averages("b", Some("c2"), 11.0),
            averages("c", Some("c1"), 13.0),
            averages("d", Some("c2"), 9.0),
        ]);
        let top: Vec<&str> = ranked
            .iter()
            .filter(|s| s.rank == 1)
            .map(|s| s.student.id.as_str())
            .collect();
        assert_eq!(top, vec!["a", "b"]);
    }

    #[test]
    fn student_without_class_is_ranked_alone() {
        let ranked = rank_by_class(vec![
            averages("a", Some("c1"), 17.0),
            averages("loose", None, 5.0),
            averages("other", None, 19.0),
        ]);
        for s in &ranked {
            if s.student.class.is_none() {
                assert_eq!(s.rank, 1);
                assert_eq!(s.rank_out_of, 1);
            }
        }
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn recomputation_is_idempotent() {
        let b = book(
            &[student("s1", Some("c1")), student("s2", Some("c1")), student("s3", Some("c2"))],
            vec![
                entry("s1", "fr", "T1", Some(12.0), Some(2)),
                entry("s2", "fr", "T1", Some(12.0), Some(2)),
                entry("s3", "math", "T2", Some(9.5), Some(3)),
                entry("s2", "math", "T2", None, Some(3)),
            ],
        );
        assert_eq!(compute_rankings(&b), compute_rankings(&b));
    }

    #[test]
    fn subject_rollup_is_separate_from_term_rollup() {
        let b = book(
            &[student("s1", Some("c1"))],
            vec![
                entry("s1", "fr", "T1", Some(10.0), Some(2)),
                entry("s1", "fr", "T2", Some(14.0), Some(2)),
                entry("s1", "math", "T1", Some(16.0), Some(4)),
                entry("s1", "math", "T2", None, Some(4)),
                entry("s1", "art", "T1", None, Some(1)),
            ],
        );
        let rollup = aggregate_by_subject(&b, &StudentId("s1".into()), None);
        let names: Vec<&str> = rollup.subjects.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["FR", "MATH", "ART"]);
        assert_eq!(rollup.subjects[0].average, Some(12.0));
        assert_eq!(rollup.subjects[1].average, Some(16.0));
        assert_eq!(rollup.subjects[1].graded_count, 1);
        assert_eq!(rollup.subjects[2].average, None);
        // (12*2 + 16*4) / 6; art has no values and stays out.
        assert_eq!(rollup.weighted_mean, Some(14.67));

        let t2 = aggregate_by_subject(&b, &StudentId("s1".into()), Some("T2"));
        assert_eq!(t2.subjects.len(), 2);
        assert_eq!(t2.weighted_mean, Some(14.0));
    }

    #[test]
    fn subject_rollup_uses_the_students_own_coefficient() {
        let b = book(
            &[student("s1", Some("c1")), student("s2", Some("c2"))],
            vec![
                entry("s1", "math", "T1", Some(10.0), Some(2)),
                entry("s2", "math", "T1", Some(18.0), Some(5)),
                entry("s2", "fr", "T1", Some(6.0), Some(1)),
            ],
        );
        let ranked = compute_rankings(&b);
        let s2 = ranked.student(&StudentId("s2".into())).expect("s2");
        assert_eq!(s2.term_average("T1"), Some(16.0));

        let rollup = aggregate_by_subject(&b, &StudentId("s2".into()), None);
        assert_eq!(rollup.subjects[0].coefficient, Some(5));
        assert_eq!(rollup.weighted_mean, Some(16.0));

        let s1 = aggregate_by_subject(&b, &StudentId("s1".into()), None);
        assert_eq!(s1.subjects[0].coefficient, Some(2));
    }

    #[test]
    fn subject_rollup_ignores_other_students() {
        let b = book(
            &[student("s1", Some("c1")), student("s2", Some("c1"))],
            vec![
                entry("s1", "fr", "T1", Some(10.0), Some(2)),
                entry("s2", "fr", "T1", Some(20.0), Some(2)),
            ],
        );
        let rollup = aggregate_by_subject(&b, &StudentId("s1".into()), None);
        assert_eq!(rollup.subjects[0].average, Some(10.0));
    }

    #[test]
    fn parse_filters_accepts_all_and_rejects_unknown_band() {
        let raw = serde_json::json!({
            "search": "  DOE ",
            "classId": "ALL",
            "sex": null,
            "appreciation": "very good"
        });
        let f = parse_display_filters(Some(&raw)).expect("parse filters");
        assert_eq!(f.search.as_deref(), Some("doe"));
        assert_eq!(f.class_id, None);
        assert_eq!(f.appreciation, Some(Appreciation::VeryGood));

        let bad = serde_json::json!({ "appreciation": "stellar" });
        assert!(parse_display_filters(Some(&bad)).is_err());
        let bad = serde_json::json!({ "search": 3 });
        assert!(parse_display_filters(Some(&bad)).is_err());
    }

    #[test]
    fn filters_do_not_rerank() {
        let b = book(
            &[student("s1", Some("c1")), student("s2", Some("c1"))],
            vec![
                entry("s1", "fr", "T1", Some(18.0), Some(1)),
                entry("s2", "fr", "T1", Some(11.0), Some(1)),
            ],
        );
        let report = compute_rankings(&b);
        let f = DisplayFilters {
            search: Some("lasts2".to_string()),
            ..DisplayFilters::default()
        };
        let rows = f.apply(&report.students);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rank, 2);
    }
}

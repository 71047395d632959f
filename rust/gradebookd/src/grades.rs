use crate::calc::CalcError;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Highest mark on the grading scale; values are validated into `[0, MAX_VALUE]`.
pub const MAX_VALUE: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StudentId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClassId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl StudentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ClassId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRef {
    pub id: ClassId,
    pub name: String,
}

/// Student identity as delivered by the grade store. Passthrough only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRef {
    pub id: StudentId,
    pub registration_number: Option<String>,
    pub last_name: String,
    pub first_name: String,
    pub sex: Option<String>,
    pub photo: Option<String>,
    pub status: Option<String>,
    pub class: Option<ClassRef>,
}

impl StudentRef {
    pub fn class_id(&self) -> Option<&ClassId> {
        self.class.as_ref().map(|c| &c.id)
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class.as_ref().map(|c| c.name.as_str())
    }

    pub fn display_name(&self) -> String {
        match (self.last_name.is_empty(), self.first_name.is_empty()) {
            (false, false) => format!("{}, {}", self.last_name, self.first_name),
            (false, true) => self.last_name.clone(),
            (true, false) => self.first_name.clone(),
            (true, true) => self.id.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    pub id: SubjectId,
    pub name: String,
    /// `None` when the store sent no coefficient or an unusable one (0, negative, fractional).
    pub coefficient: Option<u32>,
}

/// One raw grade row: student x subject x term x sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub student_id: StudentId,
    pub subject_id: SubjectId,
    pub term: String,
    pub sequence: String,
    pub value: Option<f64>,
    pub coefficient: Option<u32>,
}

impl GradeEntry {
    /// `(value, coefficient)` when this entry may take part in a weighted average.
    pub fn weighted_value(&self) -> Option<(f64, u32)> {
        match (self.value, self.coefficient) {
            (Some(v), Some(c)) if c > 0 => Some((v, c)),
            _ => None,
        }
    }
}

/// Normalised, immutable snapshot of everything the store handed over.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBook {
    pub students: Vec<StudentRef>,
    pub subjects: Vec<SubjectRef>,
    pub entries: Vec<GradeEntry>,
    #[serde(skip)]
    student_index: HashMap<StudentId, usize>,
    #[serde(skip)]
    subject_index: HashMap<SubjectId, usize>,
}

impl GradeBook {
    /// Registers a student; the first occurrence of an id wins.
    pub fn add_student(&mut self, student: StudentRef) {
        if self.student_index.contains_key(&student.id) {
            return;
        }
        self.student_index
            .insert(student.id.clone(), self.students.len());
        self.students.push(student);
    }

    pub fn add_subject(&mut self, subject: SubjectRef) {
        if self.subject_index.contains_key(&subject.id) {
            return;
        }
        self.subject_index
            .insert(subject.id.clone(), self.subjects.len());
        self.subjects.push(subject);
    }

    pub fn add_entry(&mut self, entry: GradeEntry) {
        self.entries.push(entry);
    }

    pub fn student(&self, id: &StudentId) -> Option<&StudentRef> {
        self.student_index.get(id).map(|&i| &self.students[i])
    }

    pub fn subject(&self, id: &SubjectId) -> Option<&SubjectRef> {
        self.subject_index.get(id).map(|&i| &self.subjects[i])
    }

    pub fn entries_for<'a>(&'a self, id: &'a StudentId) -> impl Iterator<Item = &'a GradeEntry> + 'a {
        self.entries.iter().filter(move |e| &e.student_id == id)
    }

    pub fn ungraded_entry_count(&self) -> usize {
        self.entries.iter().filter(|e| e.value.is_none()).count()
    }

    pub fn unweighted_entry_count(&self) -> usize {
        self.entries.iter().filter(|e| e.coefficient.is_none()).count()
    }

    /// Lowercase hex SHA-256 over the canonical JSON form of the snapshot.
    pub fn snapshot_hash(&self) -> Result<String, CalcError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| CalcError::new("hash_failed", e.to_string()))?;
        Ok(Sha256::digest(&bytes)
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect())
    }
}

fn record_err(list: &str, index: usize, message: impl Into<String>) -> CalcError {
    CalcError::new("bad_params", message).with_details(json!({ "list": list, "index": index }))
}

fn parse_id(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn opt_string(v: Option<&Value>) -> Option<String> {
    parse_id(v)
}

fn parse_coefficient(v: Option<&Value>) -> Option<u32> {
    let v = v?;
    let raw = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if raw >= 1.0 && raw.fract() == 0.0 && raw <= u32::MAX as f64 {
        Some(raw as u32)
    } else {
        None
    }
}

fn parse_value(list: &str, index: usize, v: Option<&Value>) -> Result<Option<f64>, CalcError> {
    let raw = match v {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(_) => None,
    };
    let Some(value) = raw else {
        return Err(record_err(list, index, "value must be a number or null"));
    };
    if !value.is_finite() || !(0.0..=MAX_VALUE).contains(&value) {
        return Err(CalcError::new(
            "bad_params",
            format!("value must lie in [0, {}]", MAX_VALUE),
        )
        .with_details(json!({ "list": list, "index": index, "value": value })));
    }
    Ok(Some(value))
}

fn parse_class(v: Option<&Value>) -> Option<ClassRef> {
    let obj = v?.as_object()?;
    let id = parse_id(obj.get("id"))?;
    Some(ClassRef {
        id: ClassId(id),
        name: opt_string(obj.get("name")).unwrap_or_default(),
    })
}

fn parse_student(list: &str, index: usize, v: Option<&Value>) -> Result<StudentRef, CalcError> {
    let Some(obj) = v.and_then(|v| v.as_object()) else {
        return Err(record_err(list, index, "student must be an object"));
    };
    let Some(id) = parse_id(obj.get("id")) else {
        return Err(record_err(list, index, "missing student.id"));
    };
    Ok(StudentRef {
        id: StudentId(id),
        registration_number: opt_string(obj.get("registrationNumber")),
        last_name: opt_string(obj.get("lastName")).unwrap_or_default(),
        first_name: opt_string(obj.get("firstName")).unwrap_or_default(),
        sex: opt_string(obj.get("sex")),
        photo: opt_string(obj.get("photo")),
        status: opt_string(obj.get("status")),
        class: parse_class(obj.get("class")),
    })
}

fn parse_subject(index: usize, v: Option<&Value>) -> Result<SubjectRef, CalcError> {
    let Some(obj) = v.and_then(|v| v.as_object()) else {
        return Err(record_err("records", index, "subject must be an object"));
    };
    let Some(id) = parse_id(obj.get("id")) else {
        return Err(record_err("records", index, "missing subject.id"));
    };
    Ok(SubjectRef {
        name: opt_string(obj.get("name")).unwrap_or_else(|| id.clone()),
        id: SubjectId(id),
        coefficient: parse_coefficient(obj.get("coefficient")),
    })
}

fn parse_record(book: &mut GradeBook, index: usize, raw: &Value) -> Result<(), CalcError> {
    let Some(obj) = raw.as_object() else {
        return Err(record_err("records", index, "record must be an object"));
    };
    let student = parse_student("records", index, obj.get("student"))?;
    let subject = parse_subject(index, obj.get("subject"))?;
    let Some(term) = opt_string(obj.get("term")) else {
        return Err(record_err("records", index, "missing term"));
    };
    let sequence = opt_string(obj.get("sequence")).unwrap_or_default();
    let value = parse_value("records", index, obj.get("value"))?;

    let entry = GradeEntry {
        student_id: student.id.clone(),
        subject_id: subject.id.clone(),
        term,
        sequence,
        value,
        coefficient: subject.coefficient,
    };
    book.add_student(student);
    book.add_subject(subject);
    book.add_entry(entry);
    Ok(())
}

/// Validates `params.records` (and the optional `params.students` roster) into a
/// [`GradeBook`]. Only structurally unusable input is rejected; missing values and
/// missing coefficients load fine.
pub fn parse_grade_book(params: &Value) -> Result<GradeBook, CalcError> {
    let records = match params.get("records") {
        None | Some(Value::Null) => {
            return Err(CalcError::new("bad_params", "missing params.records"));
        }
        Some(v) => v,
    };
    let Some(records) = records.as_array() else {
        return Err(CalcError::new(
            "bad_params",
            "params.records must be an array",
        ));
    };

    let mut book = GradeBook::default();

    match params.get("students") {
        None | Some(Value::Null) => {}
        Some(Value::Array(roster)) => {
            for (index, raw) in roster.iter().enumerate() {
                book.add_student(parse_student("students", index, Some(raw))?);
            }
        }
        Some(_) => {
            return Err(CalcError::new(
                "bad_params",
                "params.students must be an array",
            ));
        }
    }

    for (index, raw) in records.iter().enumerate() {
        parse_record(&mut book, index, raw)?;
    }
    Ok(book)
}

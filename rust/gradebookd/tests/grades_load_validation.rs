use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}


fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}


fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}


fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}


fn record(
    student: &str,
    class: Option<&str>,
    subject: &str,
    coefficient: serde_json::Value,
    term: &str,
    value: serde_json::Value,
) -> serde_json::Value {
    let class = class.map(|c| json!({ "id": c, "name": format!("Class {}", c) }));
    json!({
        "student": {
            "id": student,
            "registrationNumber": format!("REG-{}", student),
            "lastName": format!("Last-{}", student),
            "firstName": format!("First-{}", student),
            "sex": "F",
            "status": "active",
            "class": class
        },
        "subject": { "id": subject, "name": subject.to_uppercase(), "coefficient": coefficient },
        "term": term,
        "sequence": "Seq 1",
        "value": value
    })
}

#[test]
fn malformed_collections_are_rejected_and_keep_the_previous_snapshot() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let good = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.load",
        json!({ "records": [ record("s1", Some("c1"), "math", json!(2), "T1", json!(15)) ] }),
    );
    let hash = good
        .get("snapshotHash")
        .and_then(|v| v.as_str())
        .expect("hash")
        .to_string();

    let cases = vec![
        json!({}),
        json!({ "records": null }),
        json!({ "records": { "0": {} } }),
        json!({ "records": [ 42 ] }),
        json!({ "records": [ { "subject": { "id": "m" }, "term": "T1" } ] }),
        json!({ "records": [ record("s1", Some("c1"), "math", json!(2), "T1", json!(20.5)) ] }),
        json!({ "records": [ record("s1", Some("c1"), "math", json!(2), "T1", json!(-1)) ] }),
        json!({ "records": [ record("s1", Some("c1"), "math", json!(2), "T1", json!("abc")) ] }),
        json!({ "records": [ record("s1", Some("c1"), "math", json!(2), "T1", json!("12")) ] }),
        json!({ "records": [ record("s1", Some("c1"), "math", json!(2), "T1", json!("")) ] }),
        json!({ "records": [], "students": "everyone" }),
        json!({ "records": [], "students": [ { "lastName": "NoId" } ] }),
    ];
    for (i, params) in cases.into_iter().enumerate() {
        let id = format!("bad-{}", i);
        let resp = request(&mut stdin, &mut reader, &id, "grades.load", params.clone());
        assert_eq!(error_code(&resp), Some("bad_params"), "case {}: {}", i, params);
    }

    let health = request_ok(&mut stdin, &mut reader, "2", "health", json!({}));
    assert_eq!(
        health.get("snapshotHash").and_then(|v| v.as_str()),
        Some(hash.as_str())
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn bad_record_error_points_at_its_index() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "grades.load",
        json!({
            "records": [
                record("s1", Some("c1"), "math", json!(2), "T1", json!(11)),
                record("s1", Some("c1"), "math", json!(2), "T1", json!(11)),
                record("s1", Some("c1"), "math", json!(2), "T1", json!(99)),
            ]
        }),
    );
    let details = resp
        .get("error")
        .and_then(|e| e.get("details"))
        .cloned()
        .expect("details");
    assert_eq!(details.get("index").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(details.get("value").and_then(|v| v.as_f64()), Some(99.0));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn partially_usable_input_loads_and_is_counted() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let loaded = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.load",
        json!({
            "records": [
                record("s1", Some("c1"), "math", json!(2), "T1", json!(11)),
                record("s1", Some("c1"), "pe", json!(0), "T1", json!(18)),
                record("s1", Some("c1"), "art", json!(null), "T1", json!(18)),
                record("s1", Some("c1"), "fr", json!(3), "T1", json!(null)),
                record("7", None, "fr", json!(3), "T2", json!(12)),
            ]
        }),
    );
    assert_eq!(loaded.get("records").and_then(|v| v.as_u64()), Some(5));
    assert_eq!(loaded.get("ungradedEntries").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(loaded.get("unweightedEntries").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(loaded.get("terms"), Some(&json!(["T1", "T2"])));

    let ranked = request_ok(&mut stdin, &mut reader, "2", "rankings.compute", json!({}));
    let s1 = ranked
        .get("students")
        .and_then(|v| v.as_array())
        .and_then(|a| a.iter().find(|s| s.get("id").and_then(|v| v.as_str()) == Some("s1")))
        .cloned()
        .expect("s1");
    assert_eq!(s1.get("overallAverage").and_then(|v| v.as_f64()), Some(11.0));
    assert_eq!(s1.get("appreciation").and_then(|v| v.as_str()), Some("Fair"));

    drop(stdin);
    let _ = child.wait();
}

#![allow(dead_code)]

use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_lmsxd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn lmsxd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
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

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok response for {}: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(json!({}))
}

pub fn open_workspace_db(workspace: &Path) -> Connection {
    Connection::open(workspace.join("lmsx.sqlite3")).expect("open workspace db")
}

// ---- row seeding -----------------------------------------------------------
// The upstream ingestion pipeline is out of scope, so tests write its tables
// directly, the same way the original integration suite seeded lms/edfi rows.

pub const SEED_DATE: &str = "2021-01-01T00:00:00Z";

pub fn insert_edfi_student(conn: &Connection, student_unique_id: &str) {
    conn.execute(
        "INSERT INTO edfi_student(student_unique_id, first_name, last_surname, id)
         VALUES(?, 'FirstName', 'LastName', ?)",
        (student_unique_id, format!("id-{student_unique_id}")),
    )
    .expect("insert edfi_student");
}

pub fn insert_edfi_section(conn: &Connection, section_identifier: &str) {
    conn.execute(
        "INSERT INTO edfi_section(section_identifier) VALUES(?)",
        [section_identifier],
    )
    .expect("insert edfi_section");
}

pub fn insert_enrollment(conn: &Connection, student_unique_id: &str, section_identifier: &str) {
    conn.execute(
        "INSERT INTO edfi_student_section_association(student_unique_id, section_identifier)
         VALUES(?, ?)",
        (student_unique_id, section_identifier),
    )
    .expect("insert enrollment");
}

pub fn insert_lms_user(conn: &Connection, id: &str, source_system: &str, sis_identifier: &str) {
    conn.execute(
        "INSERT INTO lms_user(
            id, source_system_identifier, source_system, sis_user_identifier,
            local_user_identifier, user_role, name, email_address,
            create_date, last_modified_date, deleted_at)
         VALUES(?, ?, ?, ?, ?, 'student', ?, NULL, ?, ?, NULL)",
        (
            id,
            sis_identifier,
            source_system,
            sis_identifier,
            sis_identifier,
            sis_identifier,
            SEED_DATE,
            SEED_DATE,
        ),
    )
    .expect("insert lms_user");
}

pub fn insert_lms_section(
    conn: &Connection,
    id: &str,
    source_system: &str,
    sis_section_identifier: &str,
) {
    conn.execute(
        "INSERT INTO lms_section(
            id, source_system_identifier, source_system, sis_section_identifier,
            title, deleted_at)
         VALUES(?, ?, ?, ?, NULL, NULL)",
        (id, id, source_system, sis_section_identifier),
    )
    .expect("insert lms_section");
}

pub fn insert_lms_assignment(
    conn: &Connection,
    id: &str,
    source_system: &str,
    identifier: &str,
    lms_section_id: &str,
    due_date_time: Option<&str>,
) {
    conn.execute(
        "INSERT INTO lms_assignment(
            id, source_system_identifier, source_system, lms_section_id,
            title, due_date_time, deleted_at)
         VALUES(?, ?, ?, ?, ?, ?, NULL)",
        (id, identifier, source_system, lms_section_id, identifier, due_date_time),
    )
    .expect("insert lms_assignment");
}

pub fn insert_lmsx_assignment(
    conn: &Connection,
    identifier: &str,
    source_system: &str,
    section_identifier: &str,
    due_date_time: Option<&str>,
) {
    conn.execute(
        "INSERT INTO lmsx_assignment(
            assignment_identifier, source_system, section_identifier, title, due_date_time)
         VALUES(?, ?, ?, ?, ?)",
        (identifier, source_system, section_identifier, identifier, due_date_time),
    )
    .expect("insert lmsx_assignment");
}

/// Inserts the descriptor row and its extension subtype row, returning the
/// descriptor id.
pub fn insert_submission_status_descriptor(
    conn: &Connection,
    source_system: &str,
    code: &str,
) -> i64 {
    conn.execute(
        "INSERT INTO edfi_descriptor(namespace, code_value, short_description)
         VALUES(?, ?, ?)",
        (
            format!("uri://ed-fi.org/edfilms/SubmissionStatusDescriptor/{source_system}"),
            code,
            code,
        ),
    )
    .expect("insert edfi_descriptor");
    let id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO lmsx_submission_status_descriptor(submission_status_descriptor_id)
         VALUES(?)",
        [id],
    )
    .expect("insert lmsx subtype row");
    id
}

pub struct RawSubmission<'a> {
    pub id: &'a str,
    pub identifier: &'a str,
    pub source_system: &'a str,
    pub assignment_id: &'a str,
    pub lms_user_id: &'a str,
    pub status: &'a str,
    pub submission_date_time: Option<&'a str>,
    pub earned_points: Option<f64>,
    pub grade: Option<&'a str>,
    pub last_modified_date: &'a str,
    pub deleted_at: Option<&'a str>,
}

pub fn insert_raw_submission(conn: &Connection, sub: &RawSubmission) {
    conn.execute(
        "INSERT INTO lms_assignment_submission(
            id, source_system_identifier, source_system, assignment_id, lms_user_id,
            submission_status, submission_date_time, earned_points, grade,
            create_date, last_modified_date, deleted_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            sub.id,
            sub.identifier,
            sub.source_system,
            sub.assignment_id,
            sub.lms_user_id,
            sub.status,
            sub.submission_date_time,
            sub.earned_points,
            sub.grade,
            SEED_DATE,
            sub.last_modified_date,
            sub.deleted_at,
        ),
    )
    .expect("insert raw submission");
}

pub fn update_raw_submission(
    conn: &Connection,
    identifier: &str,
    status: &str,
    earned_points: Option<f64>,
    last_modified_date: &str,
) {
    let changed = conn
        .execute(
            "UPDATE lms_assignment_submission
             SET submission_status = ?, earned_points = ?, last_modified_date = ?
             WHERE source_system_identifier = ?",
            (status, earned_points, last_modified_date, identifier),
        )
        .expect("update raw submission");
    assert_eq!(changed, 1, "raw submission {identifier} not found");
}

pub fn mark_raw_submission_deleted(conn: &Connection, identifier: &str, deleted_at: &str) {
    let changed = conn
        .execute(
            "UPDATE lms_assignment_submission SET deleted_at = ?
             WHERE source_system_identifier = ?",
            (deleted_at, identifier),
        )
        .expect("mark raw submission deleted");
    assert_eq!(changed, 1, "raw submission {identifier} not found");
}

// ---- target inspection -----------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TargetRow {
    pub identifier: String,
    pub namespace: String,
    pub assignment_identifier: String,
    pub student_unique_id: String,
    pub status_descriptor_id: i64,
    pub submission_date_time: Option<String>,
    pub earned_points: Option<f64>,
    pub grade: Option<String>,
    pub last_modified_date: String,
}

pub fn target_rows(conn: &Connection) -> Vec<TargetRow> {
    let mut stmt = conn
        .prepare(
            "SELECT assignment_submission_identifier, namespace, assignment_identifier,
                    student_unique_id, submission_status_descriptor_id,
                    submission_date_time, earned_points, grade, last_modified_date
             FROM lmsx_assignment_submission
             ORDER BY assignment_submission_identifier",
        )
        .expect("prepare target query");
    let rows = stmt
        .query_map([], |row| {
            Ok(TargetRow {
                identifier: row.get(0)?,
                namespace: row.get(1)?,
                assignment_identifier: row.get(2)?,
                student_unique_id: row.get(3)?,
                status_descriptor_id: row.get(4)?,
                submission_date_time: row.get(5)?,
                earned_points: row.get(6)?,
                grade: row.get(7)?,
                last_modified_date: row.get(8)?,
            })
        })
        .expect("query target rows")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect target rows");
    rows
}

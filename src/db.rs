use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;

/// Timestamps are stored as UTC RFC3339 TEXT throughout the workspace, so
/// string order is chronological.
pub fn now_utc() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("lmsx.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Upstream LMS ingestion tables. This daemon only reads them; the
    // ingestion pipeline (or a test harness) writes them.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lms_user(
            id TEXT PRIMARY KEY,
            source_system_identifier TEXT NOT NULL,
            source_system TEXT NOT NULL,
            sis_user_identifier TEXT,
            local_user_identifier TEXT,
            user_role TEXT NOT NULL,
            name TEXT NOT NULL,
            email_address TEXT,
            create_date TEXT NOT NULL,
            last_modified_date TEXT NOT NULL,
            deleted_at TEXT,
            UNIQUE(source_system, source_system_identifier)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lms_user_sis ON lms_user(sis_user_identifier)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lms_section(
            id TEXT PRIMARY KEY,
            source_system_identifier TEXT NOT NULL,
            source_system TEXT NOT NULL,
            sis_section_identifier TEXT,
            title TEXT,
            deleted_at TEXT,
            UNIQUE(source_system, source_system_identifier)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lms_assignment(
            id TEXT PRIMARY KEY,
            source_system_identifier TEXT NOT NULL,
            source_system TEXT NOT NULL,
            lms_section_id TEXT NOT NULL,
            title TEXT NOT NULL,
            due_date_time TEXT,
            deleted_at TEXT,
            UNIQUE(source_system, source_system_identifier),
            FOREIGN KEY(lms_section_id) REFERENCES lms_section(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lms_assignment_section ON lms_assignment(lms_section_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lms_assignment_submission(
            id TEXT PRIMARY KEY,
            source_system_identifier TEXT NOT NULL,
            source_system TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            lms_user_id TEXT NOT NULL,
            submission_status TEXT NOT NULL,
            submission_date_time TEXT,
            earned_points REAL,
            grade TEXT,
            create_date TEXT NOT NULL,
            last_modified_date TEXT NOT NULL,
            deleted_at TEXT,
            UNIQUE(source_system, source_system_identifier),
            FOREIGN KEY(assignment_id) REFERENCES lms_assignment(id),
            FOREIGN KEY(lms_user_id) REFERENCES lms_user(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lms_submission_assignment
         ON lms_assignment_submission(assignment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lms_submission_user
         ON lms_assignment_submission(lms_user_id)",
        [],
    )?;

    // Workspaces created before grades were extracted lack the column.
    ensure_raw_submission_grade(&conn)?;

    // ODS core slice: only the columns the harmonizer joins on.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS edfi_student(
            student_unique_id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_surname TEXT NOT NULL,
            id TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS edfi_section(
            section_identifier TEXT PRIMARY KEY
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS edfi_student_section_association(
            student_unique_id TEXT NOT NULL,
            section_identifier TEXT NOT NULL,
            PRIMARY KEY(student_unique_id, section_identifier),
            FOREIGN KEY(student_unique_id) REFERENCES edfi_student(student_unique_id),
            FOREIGN KEY(section_identifier) REFERENCES edfi_section(section_identifier)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollment_section
         ON edfi_student_section_association(section_identifier)",
        [],
    )?;

    // Descriptors: one namespaced code table plus a subtype table per
    // descriptor family, the way the ODS models specializations.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS edfi_descriptor(
            descriptor_id INTEGER PRIMARY KEY AUTOINCREMENT,
            namespace TEXT NOT NULL,
            code_value TEXT NOT NULL,
            short_description TEXT NOT NULL,
            UNIQUE(namespace, code_value)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lmsx_submission_status_descriptor(
            submission_status_descriptor_id INTEGER PRIMARY KEY,
            FOREIGN KEY(submission_status_descriptor_id)
                REFERENCES edfi_descriptor(descriptor_id)
        )",
        [],
    )?;

    // Extension-domain assignment. assignment_identifier equals the LMS
    // assignment's source_system_identifier (the shared external identifier).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lmsx_assignment(
            assignment_identifier TEXT PRIMARY KEY,
            source_system TEXT NOT NULL,
            section_identifier TEXT NOT NULL,
            title TEXT NOT NULL,
            due_date_time TEXT,
            FOREIGN KEY(section_identifier) REFERENCES edfi_section(section_identifier)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lmsx_assignment_section
         ON lmsx_assignment(section_identifier)",
        [],
    )?;

    // Harmonization target. One row per (student, assignment), keyed by the
    // source submission identifier (real or synthesized).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lmsx_assignment_submission(
            assignment_submission_identifier TEXT PRIMARY KEY,
            id TEXT NOT NULL,
            namespace TEXT NOT NULL,
            assignment_identifier TEXT NOT NULL,
            student_unique_id TEXT NOT NULL,
            submission_status_descriptor_id INTEGER NOT NULL,
            submission_date_time TEXT,
            earned_points REAL,
            grade TEXT,
            create_date TEXT NOT NULL,
            last_modified_date TEXT NOT NULL,
            FOREIGN KEY(assignment_identifier) REFERENCES lmsx_assignment(assignment_identifier),
            FOREIGN KEY(student_unique_id) REFERENCES edfi_student(student_unique_id),
            FOREIGN KEY(submission_status_descriptor_id)
                REFERENCES lmsx_submission_status_descriptor(submission_status_descriptor_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lmsx_submission_student
         ON lmsx_assignment_submission(student_unique_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lmsx_submission_assignment
         ON lmsx_assignment_submission(assignment_identifier)",
        [],
    )?;

    // Bulk-load bookkeeping: which descriptor data files have already been
    // pushed through the external loader.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS descriptor_load_journal(
            file_name TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            loaded_at TEXT NOT NULL,
            PRIMARY KEY(file_name, sha256)
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_raw_submission_grade(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "lms_assignment_submission", "grade")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE lms_assignment_submission ADD COLUMN grade TEXT",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

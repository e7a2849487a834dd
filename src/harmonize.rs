use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db;
use crate::descriptors::{
    self, DescriptorDomain, SourceSystem, UnknownSourceSystem, MISSING_STATUS_CODE,
};

#[derive(Debug, Error)]
pub enum HarmonizeError {
    #[error(transparent)]
    UnknownSourceSystem(#[from] UnknownSourceSystem),
    #[error("no descriptor for code '{code}' under namespace '{namespace}'")]
    MissingDescriptor { namespace: String, code: String },
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarmonizeOutcome {
    /// Rows staged from real submissions (live and soft-deleted).
    pub staged: usize,
    /// Placeholder rows fabricated for past-due assignments with no submission.
    pub synthesized: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

// One candidate row for the merge. status_descriptor_id is None only on
// soft-deleted rows, which never reach the insert or update sets.
#[derive(Debug, Clone)]
struct StagedSubmission {
    identifier: String,
    student_unique_id: String,
    assignment_identifier: String,
    status_descriptor_id: Option<i64>,
    submission_date_time: Option<String>,
    earned_points: Option<f64>,
    grade: Option<String>,
    create_date: String,
    last_modified_date: String,
    deleted_at: Option<String>,
}

pub fn synthesized_identifier(section: &str, assignment: &str, student: &str) -> String {
    format!("{}#{}#{}", section, assignment, student)
}

/// Reconciles raw LMS submissions for one source system into
/// lmsx_assignment_submission. Runs entirely inside a single transaction so
/// the staging queries and the three merge phases observe one snapshot.
pub fn harmonize_submissions(
    conn: &Connection,
    source_system: SourceSystem,
    namespace: &str,
) -> Result<HarmonizeOutcome, HarmonizeError> {
    info!(source_system = %source_system, "harmonizing assignment submissions");

    let tx = conn.unchecked_transaction()?;
    let now = db::now_utc();

    let mut staging = collect_real_submissions(&tx, source_system)?;
    let staged = staging.len();

    let mut synthesized = 0;
    if source_system == SourceSystem::Schoology {
        let missing = synthesize_missing_submissions(&tx, &now)?;
        synthesized = missing.len();
        staging.extend(missing);
    }

    // Snapshot of the target before any phase runs. Partitioning against this
    // snapshot (not the live table) is what lets several staged rows for one
    // new student all insert in the same invocation.
    let mut existing: HashMap<String, String> = HashMap::new();
    let mut existing_students: HashSet<String> = HashSet::new();
    {
        let mut stmt = tx.prepare(
            "SELECT assignment_submission_identifier, student_unique_id, last_modified_date
             FROM lmsx_assignment_submission",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let identifier: String = row.get(0)?;
            let student: String = row.get(1)?;
            let modified: String = row.get(2)?;
            existing.insert(identifier, modified);
            existing_students.insert(student);
        }
    }

    let mut inserted = 0;
    let mut updated = 0;
    let mut deleted = 0;

    for row in &staging {
        if row.deleted_at.is_some() {
            // Soft-deleted upstream: remove the harmonized counterpart.
            if existing.contains_key(&row.identifier) {
                tx.execute(
                    "DELETE FROM lmsx_assignment_submission
                     WHERE assignment_submission_identifier = ?",
                    [&row.identifier],
                )?;
                deleted += 1;
            }
            continue;
        }
        let Some(descriptor_id) = row.status_descriptor_id else {
            continue;
        };

        match existing.get(&row.identifier) {
            None => {
                // A student with any harmonized row at all blocks insertion of
                // further rows for that student.
                if existing_students.contains(&row.student_unique_id) {
                    continue;
                }
                tx.execute(
                    "INSERT INTO lmsx_assignment_submission(
                        assignment_submission_identifier, id, namespace,
                        assignment_identifier, student_unique_id,
                        submission_status_descriptor_id, submission_date_time,
                        earned_points, grade, create_date, last_modified_date)
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    (
                        &row.identifier,
                        Uuid::new_v4().to_string(),
                        namespace,
                        &row.assignment_identifier,
                        &row.student_unique_id,
                        descriptor_id,
                        &row.submission_date_time,
                        row.earned_points,
                        &row.grade,
                        &row.create_date,
                        &row.last_modified_date,
                    ),
                )?;
                inserted += 1;
            }
            Some(stored_modified) => {
                // Last-write-wins, strictly newer only.
                if row.last_modified_date <= *stored_modified {
                    continue;
                }
                tx.execute(
                    "UPDATE lmsx_assignment_submission
                     SET submission_status_descriptor_id = ?,
                         submission_date_time = ?,
                         earned_points = ?,
                         grade = ?,
                         last_modified_date = ?
                     WHERE assignment_submission_identifier = ?",
                    (
                        descriptor_id,
                        &row.submission_date_time,
                        row.earned_points,
                        &row.grade,
                        &now,
                        &row.identifier,
                    ),
                )?;
                updated += 1;
            }
        }
    }

    tx.commit()?;

    let outcome = HarmonizeOutcome {
        staged,
        synthesized,
        inserted,
        updated,
        deleted,
    };
    debug!(
        staged = outcome.staged,
        synthesized = outcome.synthesized,
        inserted = outcome.inserted,
        updated = outcome.updated,
        deleted = outcome.deleted,
        "harmonization applied"
    );
    Ok(outcome)
}

// Phase 1: join raw submissions to the extension assignment, the student, and
// the status descriptor for the source system's namespace. The descriptor is
// LEFT-joined so an unresolved code on a live row can abort the whole run
// instead of silently dropping the row.
fn collect_real_submissions(
    conn: &Connection,
    source_system: SourceSystem,
) -> Result<Vec<StagedSubmission>, HarmonizeError> {
    let namespace = DescriptorDomain::SubmissionStatus.namespace(source_system);

    let mut stmt = conn.prepare(
        "SELECT
            sub.source_system_identifier,
            st.student_unique_id,
            xa.assignment_identifier,
            ssd.submission_status_descriptor_id,
            sub.submission_status,
            sub.submission_date_time,
            sub.earned_points,
            sub.grade,
            sub.create_date,
            sub.last_modified_date,
            sub.deleted_at
         FROM lms_assignment_submission sub
         JOIN lms_assignment a ON a.id = sub.assignment_id
         JOIN lmsx_assignment xa
             ON xa.assignment_identifier = a.source_system_identifier
            AND xa.source_system = a.source_system
         JOIN lms_user u ON u.id = sub.lms_user_id
         JOIN edfi_student st ON st.student_unique_id = u.sis_user_identifier
         LEFT JOIN edfi_descriptor d
             ON d.namespace = ?2 AND d.code_value = sub.submission_status
         LEFT JOIN lmsx_submission_status_descriptor ssd
             ON ssd.submission_status_descriptor_id = d.descriptor_id
         WHERE sub.source_system = ?1
         ORDER BY sub.source_system_identifier",
    )?;

    let mut staging = Vec::new();
    let mut rows = stmt.query((source_system.as_str(), &namespace))?;
    while let Some(row) = rows.next()? {
        let status_descriptor_id: Option<i64> = row.get(3)?;
        let status_code: String = row.get(4)?;
        let deleted_at: Option<String> = row.get(10)?;
        if status_descriptor_id.is_none() && deleted_at.is_none() {
            return Err(HarmonizeError::MissingDescriptor {
                namespace,
                code: status_code,
            });
        }
        staging.push(StagedSubmission {
            identifier: row.get(0)?,
            student_unique_id: row.get(1)?,
            assignment_identifier: row.get(2)?,
            status_descriptor_id,
            submission_date_time: row.get(5)?,
            earned_points: row.get(6)?,
            grade: row.get(7)?,
            create_date: row.get(8)?,
            last_modified_date: row.get(9)?,
            deleted_at,
        });
    }
    Ok(staging)
}

// Phase 2: fabricate a "missing" placeholder for every enrolled student with
// no submission to a past-due assignment. Schoology-specific policy; the
// caller gates on the source system.
fn synthesize_missing_submissions(
    conn: &Connection,
    now: &str,
) -> Result<Vec<StagedSubmission>, HarmonizeError> {
    let missing_descriptor = descriptors::resolve(
        conn,
        DescriptorDomain::SubmissionStatus,
        SourceSystem::Schoology,
        MISSING_STATUS_CODE,
    )?;
    let Some(missing_descriptor) = missing_descriptor else {
        return Err(HarmonizeError::MissingDescriptor {
            namespace: DescriptorDomain::SubmissionStatus.namespace(SourceSystem::Schoology),
            code: MISSING_STATUS_CODE.to_string(),
        });
    };

    let mut stmt = conn.prepare(
        "SELECT xa.section_identifier, xa.assignment_identifier, ssa.student_unique_id
         FROM lmsx_assignment xa
         JOIN edfi_student_section_association ssa
             ON ssa.section_identifier = xa.section_identifier
         WHERE xa.source_system = ?1
           AND xa.due_date_time IS NOT NULL
           AND xa.due_date_time < ?2
           AND NOT EXISTS (
               SELECT 1
               FROM lms_assignment_submission sub
               JOIN lms_user u ON u.id = sub.lms_user_id
               JOIN lms_assignment a ON a.id = sub.assignment_id
               WHERE u.sis_user_identifier = ssa.student_unique_id
                 AND a.source_system_identifier = xa.assignment_identifier
                 AND a.source_system = xa.source_system
           )
         ORDER BY xa.assignment_identifier, ssa.student_unique_id",
    )?;

    let mut synthesized = Vec::new();
    let mut rows = stmt.query((SourceSystem::Schoology.as_str(), now))?;
    while let Some(row) = rows.next()? {
        let section: String = row.get(0)?;
        let assignment: String = row.get(1)?;
        let student: String = row.get(2)?;
        synthesized.push(StagedSubmission {
            identifier: synthesized_identifier(&section, &assignment, &student),
            student_unique_id: student,
            assignment_identifier: assignment,
            status_descriptor_id: Some(missing_descriptor),
            submission_date_time: None,
            earned_points: None,
            grade: None,
            create_date: now.to_string(),
            last_modified_date: now.to_string(),
            deleted_at: None,
        });
    }
    Ok(synthesized)
}

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, warn};

use crate::descriptors::{DescriptorDomain, NAMESPACE_ROOT};

/// Counts of ingested LMS records that could not be matched into the ODS.
/// These are reported, never repaired: the fix is always upstream (missing
/// SIS identifiers, unloaded descriptors, stale rosters).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionsSummary {
    pub unmatched_users: i64,
    pub unmatched_sections: i64,
    pub unmatched_assignments: i64,
    pub unmatched_submissions: i64,
    pub unmatched_submission_status_codes: i64,
}

impl ExceptionsSummary {
    pub fn total(&self) -> i64 {
        self.unmatched_users
            + self.unmatched_sections
            + self.unmatched_assignments
            + self.unmatched_submissions
            + self.unmatched_submission_status_codes
    }
}

pub fn summarize(conn: &Connection) -> rusqlite::Result<ExceptionsSummary> {
    let count = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |r| r.get(0)) };

    let unmatched_users = count(
        "SELECT COUNT(*) FROM lms_user u
         WHERE u.deleted_at IS NULL
           AND NOT EXISTS (
               SELECT 1 FROM edfi_student st
               WHERE st.student_unique_id = u.sis_user_identifier
           )",
    )?;
    let unmatched_sections = count(
        "SELECT COUNT(*) FROM lms_section s
         WHERE s.deleted_at IS NULL
           AND NOT EXISTS (
               SELECT 1 FROM edfi_section es
               WHERE es.section_identifier = s.sis_section_identifier
           )",
    )?;
    let unmatched_assignments = count(
        "SELECT COUNT(*) FROM lms_assignment a
         WHERE a.deleted_at IS NULL
           AND NOT EXISTS (
               SELECT 1 FROM lmsx_assignment xa
               WHERE xa.assignment_identifier = a.source_system_identifier
                 AND xa.source_system = a.source_system
           )",
    )?;
    let unmatched_submissions = count(
        "SELECT COUNT(*) FROM lms_assignment_submission sub
         WHERE sub.deleted_at IS NULL
           AND NOT EXISTS (
               SELECT 1 FROM lmsx_assignment_submission t
               WHERE t.assignment_submission_identifier = sub.source_system_identifier
           )",
    )?;
    // Distinct live status codes with no descriptor under their source
    // system's namespace. These are exactly the codes that would abort a
    // harmonization run.
    let unmatched_submission_status_codes = {
        let sql = format!(
            "SELECT COUNT(*) FROM (
                 SELECT DISTINCT sub.source_system, sub.submission_status
                 FROM lms_assignment_submission sub
                 WHERE sub.deleted_at IS NULL
                   AND NOT EXISTS (
                       SELECT 1 FROM edfi_descriptor d
                       WHERE d.namespace = '{}/{}/' || sub.source_system
                         AND d.code_value = sub.submission_status
                   )
             )",
            NAMESPACE_ROOT,
            DescriptorDomain::SubmissionStatus.descriptor_name()
        );
        conn.query_row(&sql, [], |r| r.get(0))?
    };

    Ok(ExceptionsSummary {
        unmatched_users,
        unmatched_sections,
        unmatched_assignments,
        unmatched_submissions,
        unmatched_submission_status_codes,
    })
}

pub fn log_summary(summary: &ExceptionsSummary) {
    if summary.total() == 0 {
        debug!("There are no unmatched records");
        return;
    }
    warn!(
        "There are {} unmatched sections and {} unmatched users",
        summary.unmatched_sections, summary.unmatched_users
    );
    warn!(
        "There are {} unmatched Assignments and {} unmatched Submissions",
        summary.unmatched_assignments, summary.unmatched_submissions
    );
    warn!(
        "There are {} unmatched submission status codes",
        summary.unmatched_submission_status_codes
    );
}

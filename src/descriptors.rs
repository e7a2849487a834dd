use rusqlite::{Connection, OptionalExtension};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Root of every descriptor namespace the LMS extension publishes.
pub const NAMESPACE_ROOT: &str = "uri://ed-fi.org/edfilms";

/// Status code used for synthesized placeholder submissions.
pub const MISSING_STATUS_CODE: &str = "missing";

/// The LMS platforms the ingestion pipeline tags records with. The tag is the
/// wire value carried in every source_system column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSystem {
    Canvas,
    GoogleClassroom,
    Schoology,
}

impl SourceSystem {
    pub const ALL: [SourceSystem; 3] = [
        SourceSystem::Canvas,
        SourceSystem::GoogleClassroom,
        SourceSystem::Schoology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Canvas => "Canvas",
            SourceSystem::GoogleClassroom => "GoogleClassroom",
            SourceSystem::Schoology => "Schoology",
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown source system: {0}")]
pub struct UnknownSourceSystem(pub String);

impl FromStr for SourceSystem {
    type Err = UnknownSourceSystem;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceSystem::ALL
            .iter()
            .find(|sys| sys.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownSourceSystem(s.to_string()))
    }
}

/// Descriptor families the harmonizer resolves. Lookups are keyed by
/// (domain, source system, code) rather than a preassembled namespace string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorDomain {
    SubmissionStatus,
}

impl DescriptorDomain {
    pub fn descriptor_name(&self) -> &'static str {
        match self {
            DescriptorDomain::SubmissionStatus => "SubmissionStatusDescriptor",
        }
    }

    // Each family has its own subtype table in the extension schema.
    fn subtype_table(&self) -> &'static str {
        match self {
            DescriptorDomain::SubmissionStatus => "lmsx_submission_status_descriptor",
        }
    }

    pub fn namespace(&self, source_system: SourceSystem) -> String {
        format!(
            "{}/{}/{}",
            NAMESPACE_ROOT,
            self.descriptor_name(),
            source_system.as_str()
        )
    }
}

/// Resolves a code value to its descriptor id under the source system's
/// namespace. The descriptor must exist in the core table AND carry the
/// extension subtype row; a bare edfi_descriptor row is not enough.
pub fn resolve(
    conn: &Connection,
    domain: DescriptorDomain,
    source_system: SourceSystem,
    code: &str,
) -> rusqlite::Result<Option<i64>> {
    let sql = format!(
        "SELECT d.descriptor_id
         FROM edfi_descriptor d
         JOIN {} s ON s.submission_status_descriptor_id = d.descriptor_id
         WHERE d.namespace = ? AND d.code_value = ?",
        domain.subtype_table()
    );
    conn.query_row(&sql, (domain.namespace(source_system), code), |r| r.get(0))
        .optional()
}

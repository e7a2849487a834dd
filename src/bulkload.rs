use anyhow::{anyhow, Context};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::db;

/// Settings for one invocation of the external bulk-load console client that
/// seeds descriptor reference data into the ODS. The client itself is an
/// opaque collaborator; this module only assembles its argument list and
/// keeps a journal of data files already pushed through it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkLoadConfig {
    pub client_path: PathBuf,
    pub data_dir: PathBuf,
    pub base_url: String,
    pub working_dir: PathBuf,
    pub key: String,
    pub secret: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_max_simultaneous_requests")]
    pub max_simultaneous_requests: u32,
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_retries() -> u32 {
    4
}

fn default_max_simultaneous_requests() -> u32 {
    100
}

fn default_extension() -> String {
    "edfilms".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkLoadSummary {
    pub files_seen: usize,
    pub files_loaded: usize,
    /// True when every data file was already journaled and the client was
    /// not invoked.
    pub skipped: bool,
}

/// The client's argument list is fixed; only the values vary per deployment.
pub fn client_args(cfg: &BulkLoadConfig) -> Vec<String> {
    vec![
        "-r".to_string(),
        cfg.retries.to_string(),
        "-d".to_string(),
        cfg.data_dir.to_string_lossy().to_string(),
        "-b".to_string(),
        cfg.base_url.clone(),
        "-w".to_string(),
        cfg.working_dir.to_string_lossy().to_string(),
        "-k".to_string(),
        cfg.key.clone(),
        "-s".to_string(),
        cfg.secret.clone(),
        "-l".to_string(),
        cfg.max_simultaneous_requests.to_string(),
        "-g".to_string(),
        "-f".to_string(),
        "-n".to_string(),
        "-e".to_string(),
        cfg.extension.clone(),
    ]
}

pub fn load_descriptors(
    conn: &Connection,
    cfg: &BulkLoadConfig,
) -> anyhow::Result<BulkLoadSummary> {
    let files = data_files(&cfg.data_dir)?;
    if files.is_empty() {
        return Err(anyhow!(
            "no descriptor data files in {}",
            cfg.data_dir.to_string_lossy()
        ));
    }

    let mut hashed: Vec<(String, String)> = Vec::new();
    for path in &files {
        hashed.push((file_name_of(path), sha256_of(path)?));
    }

    let mut pending = 0;
    for (name, hash) in &hashed {
        let seen: i64 = conn.query_row(
            "SELECT COUNT(*) FROM descriptor_load_journal WHERE file_name = ? AND sha256 = ?",
            (name, hash),
            |r| r.get(0),
        )?;
        if seen == 0 {
            pending += 1;
        }
    }
    if pending == 0 {
        return Ok(BulkLoadSummary {
            files_seen: files.len(),
            files_loaded: 0,
            skipped: true,
        });
    }

    let status = Command::new(&cfg.client_path)
        .args(client_args(cfg))
        .status()
        .with_context(|| {
            format!(
                "failed to run bulk load client {}",
                cfg.client_path.to_string_lossy()
            )
        })?;
    if !status.success() {
        return Err(anyhow!("bulk load client exited with {}", status));
    }

    let loaded_at = db::now_utc();
    for (name, hash) in &hashed {
        conn.execute(
            "INSERT OR IGNORE INTO descriptor_load_journal(file_name, sha256, loaded_at)
             VALUES(?, ?, ?)",
            (name, hash, &loaded_at),
        )?;
    }

    Ok(BulkLoadSummary {
        files_seen: files.len(),
        files_loaded: pending,
        skipped: false,
    })
}

// The loader consumes the Ed-Fi XML bootstrap interchange files.
fn data_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for ent in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read data directory {}", dir.to_string_lossy()))?
    {
        let p = ent?.path();
        if !p.is_file() {
            continue;
        }
        let is_xml = p
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);
        if is_xml {
            files.push(p);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn sha256_of(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

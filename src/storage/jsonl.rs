//! JSONL-backed history store: one file per session, one exchange per line.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::HistoryStore;
use crate::domain::Exchange;
use crate::error::{Result, SqlPilotError};

pub struct JsonlHistoryStore {
    base_path: PathBuf,
}

impl JsonlHistoryStore {
    /// Create a store rooted at `base_path`, creating the directory if needed.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// File backing a session. Session ids are hashed so any string is a safe name.
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", session_file_stem(session_id)))
    }
}

fn session_file_stem(session_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    let hash = hex::encode(hasher.finalize());
    hash[..16].to_string()
}

impl HistoryStore for JsonlHistoryStore {
    fn load(&self, session_id: &str) -> Result<Vec<Exchange>> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut exchanges = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let exchange: Exchange = serde_json::from_str(&line).map_err(|e| {
                SqlPilotError::Storage(format!("{}:{}: {}", path.display(), number + 1, e))
            })?;
            exchanges.push(exchange);
        }
        Ok(exchanges)
    }

    fn append(&self, session_id: &str, exchange: &Exchange) -> Result<()> {
        let path = self.session_path(session_id);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(exchange)?)?;
        Ok(())
    }

    fn remove(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id);
        if path.exists() {
            fs::remove_file(&path)?;
            log::debug!("Removed history file {}", path.display());
        }
        Ok(())
    }
}

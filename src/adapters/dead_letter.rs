use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("failed to write dead letter: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode dead letter: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub topic: String,
    pub payload: String,
    pub received_at: String,
    pub kind: String,
    pub error: String,
}

/// Append-only JSON-lines file of messages that could not be persisted.
#[derive(Debug, Clone)]
pub struct DeadLetterLog {
    path: PathBuf,
}

impl DeadLetterLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, letter: &DeadLetter) -> Result<(), DeadLetterError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut line = serde_json::to_string(letter)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DeadLetter, DeadLetterLog};

    #[test]
    fn appends_one_json_line_per_letter() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let log = DeadLetterLog::new(dir.path().join("nested").join("dead.jsonl"));

        for topic in ["loft/sensors", "loft/alerts/wind"] {
            log.append(&DeadLetter {
                topic: topic.to_string(),
                payload: "{}".to_string(),
                received_at: "2026-02-20T10:00:00.000Z".to_string(),
                kind: "sensor".to_string(),
                error: "disk full".to_string(),
            })
            .expect("append should succeed");
        }

        let content = std::fs::read_to_string(log.path()).expect("file should be readable");
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).expect("line should be json"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["topic"], "loft/alerts/wind");
        assert_eq!(lines[0]["receivedAt"], "2026-02-20T10:00:00.000Z");
    }
}

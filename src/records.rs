//! Append-only JSON-lines log of finished matches.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::results::MatchResult;

/// One [`MatchResult`] per line, appended as matches finish. Existing content is never
/// rewritten.
#[derive(Debug)]
pub struct ResultLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ResultLog {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("could not open result log {}", path.display()))?;
        debug!(path = %path.display(), "result log opened");
        Ok(ResultLog {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `result` as one line and flush it.
    pub fn append(&mut self, result: &MatchResult) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, result)?;
        self.writer.write_all(b"\n")?;
        self.writer
            .flush()
            .with_context(|| format!("could not write to {}", self.path.display()))
    }

    /// Read back every record of the log at `path`.
    pub fn read_all(path: impl AsRef<Path>) -> anyhow::Result<Vec<MatchResult>> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("could not open {}", path.display()))?;
        let mut results = vec![];
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let result = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: malformed record", path.display(), n + 1))?;
            results.push(result);
        }
        Ok(results)
    }
}

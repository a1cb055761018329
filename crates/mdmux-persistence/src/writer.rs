//! JSON Lines upsert store.
//!
//! Every upserted value is appended as one JSON object per line:
//! - Each line is self-contained, so an interrupted write only loses that line
//! - Files rotate daily (`{name}_{YYYY-MM-DD}.jsonl`)
//! - Reading back keeps the last line per key, which gives upsert semantics
//!   over an append-only log

use crate::error::{PersistenceError, PersistenceResult};
use crate::store::UpsertStore;
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One persisted line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertRecord<V> {
    pub key: String,
    pub written_at_ms: i64,
    pub value: V,
}

/// Active writer state for the current day's file.
struct ActiveWriter {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

struct WriterState {
    base_dir: PathBuf,
    name: String,
    active: Option<ActiveWriter>,
}

impl WriterState {
    fn file_path(&self, date: &str) -> PathBuf {
        self.base_dir.join(format!("{}_{}.jsonl", self.name, date))
    }

    fn close_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush writer on close");
            }
            info!(
                name = %self.name,
                date = %active.date,
                records = active.records_written,
                "Closed JSON Lines writer"
            );
        }
    }

    fn open(&mut self, date: &str) -> PersistenceResult<()> {
        let path = self.file_path(date);
        info!(path = %path.display(), "Opening JSON Lines writer (append mode)");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.active = Some(ActiveWriter {
            writer: BufWriter::new(file),
            date: date.to_string(),
            records_written: 0,
        });
        Ok(())
    }

    fn write_lines(&mut self, lines: &[String]) -> PersistenceResult<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();

        let needs_rotation = self
            .active
            .as_ref()
            .map(|w| w.date != today)
            .unwrap_or(false);
        if needs_rotation {
            self.close_active();
        }
        if self.active.is_none() {
            self.open(&today)?;
        }

        let Some(active) = self.active.as_mut() else {
            return Err(PersistenceError::Unavailable("no active writer".to_string()));
        };
        for line in lines {
            writeln!(active.writer, "{line}")?;
        }
        active.writer.flush()?;
        active.records_written += lines.len();

        debug!(date = %today, records = lines.len(), "Appended upserts to JSON Lines");
        Ok(())
    }
}

impl Drop for WriterState {
    fn drop(&mut self) {
        self.close_active();
    }
}

/// Append-only JSON Lines store with upsert read-back.
pub struct JsonLinesStore<V> {
    state: Arc<Mutex<WriterState>>,
    _value: PhantomData<fn(V)>,
}

impl<V> JsonLinesStore<V>
where
    V: Serialize + DeserializeOwned + Send + 'static,
{
    /// Create a store writing `{base_dir}/{name}_{date}.jsonl`.
    pub fn new(base_dir: impl AsRef<Path>, name: &str) -> PersistenceResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;

        Ok(Self {
            state: Arc::new(Mutex::new(WriterState {
                base_dir,
                name: name.to_string(),
                active: None,
            })),
            _value: PhantomData,
        })
    }

    /// Rebuild the latest value per key from every file of this store.
    ///
    /// Files are replayed in date order; unparsable lines are skipped.
    pub fn load_latest(&self) -> PersistenceResult<HashMap<String, V>> {
        let (base_dir, prefix) = {
            let state = self.state.lock();
            (state.base_dir.clone(), format!("{}_", state.name))
        };

        let mut files: Vec<PathBuf> = std::fs::read_dir(&base_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension().map(|ext| ext == "jsonl").unwrap_or(false)
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(&prefix))
                        .unwrap_or(false)
            })
            .collect();
        files.sort();

        let mut latest = HashMap::new();
        for path in files {
            let reader = BufReader::new(File::open(&path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<UpsertRecord<V>>(&line) {
                    Ok(record) => {
                        latest.insert(record.key, record.value);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), line = line_no + 1, error = %e, "Skipping corrupt line");
                    }
                }
            }
        }
        Ok(latest)
    }
}

impl<V> UpsertStore<V> for JsonLinesStore<V>
where
    V: Serialize + DeserializeOwned + Send + 'static,
{
    async fn upsert_batch(&self, batch: HashMap<String, V>) -> PersistenceResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let written_at_ms = Utc::now().timestamp_millis();
        let mut lines = Vec::with_capacity(batch.len());
        for (key, value) in batch {
            let record = UpsertRecord {
                key,
                written_at_ms,
                value,
            };
            lines.push(serde_json::to_string(&record)?);
        }

        let state = self.state.clone();
        tokio::task::spawn_blocking(move || state.lock().write_lines(&lines))
            .await
            .map_err(|e| PersistenceError::Task(e.to_string()))?
    }
}

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use uuid::Uuid;

use super::{ObservationFilter, ObservationStore};
use crate::dedup;
use crate::models::Observation;

const MAX_SIZE: u64 = 10 * 1024 * 1024;
const MAX_ROTATED: usize = 5;

/// A JSONL-backed store under `~/.observers/observations.jsonl`, with the
/// same lock/append/rotate discipline as the teacher's event ledger. This
/// is what the CLI and the test suite use by default: it makes the crate
/// runnable and fully testable without any external host.
pub struct LocalObservationStore {
    path: PathBuf,
}

impl LocalObservationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LocalObservationStore { path: path.into() }
    }

    fn read_all(&self) -> Result<Vec<Observation>> {
        let Ok(file) = fs::File::open(&self.path) else {
            return Ok(Vec::new());
        };
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line.context("reading observations store")?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(obs) = serde_json::from_str::<Observation>(&line) {
                out.push(obs);
            }
        }
        Ok(out)
    }

    fn rewrite_all(&self, observations: &[Observation]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("creating observations directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .context("opening observations store for rewrite")?;
        file.lock_exclusive().context("locking observations store")?;
        for obs in observations {
            let mut line = serde_json::to_string(obs).context("serializing observation")?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }
        file.flush()?;
        file.unlock().ok();
        Ok(())
    }

    fn append_one(&self, obs: &Observation) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).context("creating observations directory")?;
            }
        }

        let mut line = serde_json::to_string(obs).context("serializing observation")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("opening observations store")?;
        file.lock_exclusive().context("locking observations store")?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        if let Ok(meta) = file.metadata() {
            if meta.len() > MAX_SIZE {
                drop(file);
                if let Err(e) = rotate_and_cleanup(&self.path, MAX_ROTATED) {
                    eprintln!("[observers] store rotation failed: {e}");
                }
                return Ok(());
            }
        }
        file.unlock().ok();
        Ok(())
    }
}

fn rotate_and_cleanup(path: &Path, keep: usize) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("observations");

    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();

    let rotated_name = format!("{stem}.{ts}.jsonl");
    fs::rename(path, parent.join(rotated_name))?;

    OpenOptions::new().create(true).write(true).truncate(true).open(path)?;

    let mut rotated: Vec<(PathBuf, SystemTime)> = fs::read_dir(parent)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().into_string().ok()?;
            let matches =
                name.starts_with(stem) && name.ends_with(".jsonl") && name != path.file_name()?.to_str()?;
            if !matches {
                return None;
            }
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((e.path(), modified))
        })
        .collect();

    rotated.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in rotated.into_iter().skip(keep) {
        if let Err(e) = fs::remove_file(&path) {
            eprintln!("[observers] failed to remove rotated store file {path:?}: {e}");
        }
    }
    Ok(())
}

#[async_trait]
impl ObservationStore for LocalObservationStore {
    async fn list(&self, filter: &ObservationFilter) -> Result<Vec<Observation>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|obs| filter.matches(obs))
            .collect())
    }

    async fn write_new(&self, candidates: Vec<Observation>) -> Result<Vec<Observation>> {
        let existing = self.read_all()?;
        let existing_open: Vec<Observation> =
            existing.into_iter().filter(|o| o.is_open()).collect();
        let fresh = dedup::aggregate_results(candidates);
        let new_ones = dedup::filter_new(&existing_open, fresh);
        for obs in &new_ones {
            self.append_one(obs)?;
        }
        Ok(new_ones)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Observation>> {
        Ok(self.read_all()?.into_iter().find(|o| o.id == id))
    }

    async fn update(&self, observation: Observation) -> Result<()> {
        let mut all = self.read_all()?;
        if let Some(slot) = all.iter_mut().find(|o| o.id == observation.id) {
            *slot = observation;
        } else {
            all.push(observation);
        }
        self.rewrite_all(&all)
    }
}

//! Sharded audit log of resolution trails.
//!
//! Writers append to their own staging buffer (no contention between
//! writers); a single merger periodically drains every buffer into
//! append-only JSONL shard files, one per jurisdiction prefix. Reads see a
//! record once the next merge has run. Records that fail to reach disk are
//! staged again for the following merge.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::authority::ResolutionTrail;
use crate::config::ProvenanceConfig;
use crate::types::{AtlasError, ExcludedFeature, Result};

/// One logged resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// Writer that produced the record
    pub writer: Uuid,
    pub jurisdiction: String,
    pub trail: ResolutionTrail,
    /// Features of the accepted dataset that were not committed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<ExcludedFeature>,
    pub recorded_at: DateTime<Utc>,
}

/// Shard for a jurisdiction: its first two `-` segments (`us-wa-seattle`
/// goes to `us-wa`).
pub fn shard_key(jurisdiction: &str) -> String {
    let segments: Vec<String> = jurisdiction
        .split('-')
        .map(|s| {
            s.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|s| !s.is_empty())
        .take(2)
        .collect();
    if segments.is_empty() {
        "unknown".to_string()
    } else {
        segments.join("-")
    }
}

/// Staged records of one writer.
#[derive(Debug, Default)]
struct Staging {
    records: Vec<AuditRecord>,
    /// Cleared when the writer is dropped; the entry goes once drained
    live: bool,
}

impl Staging {
    fn live() -> Self {
        Self {
            records: Vec::new(),
            live: true,
        }
    }
}

/// The log: staging buffers plus the shard directory.
pub struct ProvenanceLog {
    dir: PathBuf,
    staging: DashMap<Uuid, Staging>,
    merge_lock: Mutex<()>,
}

impl ProvenanceLog {
    pub fn new(dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.into(),
            staging: DashMap::new(),
            merge_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a new writer with its own staging buffer.
    pub fn writer(self: &Arc<Self>) -> LogWriter {
        let id = Uuid::new_v4();
        self.staging.insert(id, Staging::live());
        LogWriter {
            id,
            log: Arc::clone(self),
        }
    }

    /// Records staged but not yet merged.
    pub fn pending(&self) -> usize {
        self.staging.iter().map(|entry| entry.records.len()).sum()
    }

    /// Writers with a staging entry: live ones plus dropped ones whose
    /// records are still unmerged.
    pub fn staged_writers(&self) -> usize {
        self.staging.len()
    }

    /// Drain every staging buffer into its shard file. Returns the number of
    /// records written.
    ///
    /// On a write failure the unwritten records are staged again and the
    /// error is returned; shards already appended stay appended.
    pub async fn merge(&self) -> Result<usize> {
        let _guard = self.merge_lock.lock().await;
        if self.pending() == 0 {
            return Ok(0);
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut drained: Vec<AuditRecord> = Vec::new();
        for mut entry in self.staging.iter_mut() {
            drained.append(&mut entry.records);
        }
        self.staging
            .retain(|_, staging| staging.live || !staging.records.is_empty());

        let mut shards: BTreeMap<String, Vec<AuditRecord>> = BTreeMap::new();
        for record in drained {
            shards
                .entry(shard_key(&record.jurisdiction))
                .or_default()
                .push(record);
        }

        let mut written = 0;
        let mut remaining = shards.into_iter();
        while let Some((shard, mut records)) = remaining.next() {
            records.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then(a.id.cmp(&b.id)));
            if let Err(e) = self.append_shard(&shard, &records).await {
                let unwritten: Vec<AuditRecord> = records
                    .into_iter()
                    .chain(remaining.flat_map(|(_, records)| records))
                    .collect();
                warn!(
                    shard = %shard,
                    restaged = unwritten.len(),
                    error = %e,
                    "Provenance shard write failed"
                );
                self.restage(unwritten);
                return Err(e);
            }
            debug!(shard = %shard, records = records.len(), "Merged provenance shard");
            written += records.len();
        }
        Ok(written)
    }

    async fn append_shard(&self, shard: &str, records: &[AuditRecord]) -> Result<()> {
        let mut lines = String::new();
        for record in records {
            lines.push_str(&serde_json::to_string(record).map_err(std::io::Error::from)?);
            lines.push('\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.shard_path(shard))
            .await?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Put records back under their writers for the next merge.
    fn restage(&self, records: Vec<AuditRecord>) {
        for record in records {
            self.staging
                .entry(record.writer)
                .or_default()
                .records
                .push(record);
        }
    }

    /// Every merged record of one shard, in file order.
    pub async fn read_shard(&self, shard: &str) -> Result<Vec<AuditRecord>> {
        let contents = match tokio::fs::read_to_string(self.shard_path(shard)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AtlasError::Io(e)),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| AtlasError::Io(std::io::Error::from(e)))
            })
            .collect()
    }

    fn shard_path(&self, shard: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", shard))
    }
}

/// Handle for appending records. Cheap to create; one per task.
pub struct LogWriter {
    id: Uuid,
    log: Arc<ProvenanceLog>,
}

impl LogWriter {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stage a trail for the next merge.
    pub fn record(&self, jurisdiction: &str, trail: ResolutionTrail) {
        self.record_with_exclusions(jurisdiction, trail, Vec::new());
    }

    /// Stage a trail along with the features left out of the accepted
    /// dataset.
    pub fn record_with_exclusions(
        &self,
        jurisdiction: &str,
        trail: ResolutionTrail,
        excluded: Vec<ExcludedFeature>,
    ) {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            writer: self.id,
            jurisdiction: jurisdiction.to_string(),
            trail,
            excluded,
            recorded_at: Utc::now(),
        };
        self.log
            .staging
            .entry(self.id)
            .or_insert_with(Staging::live)
            .records
            .push(record);
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let staging = &self.log.staging;
        if staging.remove_if(&self.id, |_, s| s.records.is_empty()).is_none() {
            if let Some(mut entry) = staging.get_mut(&self.id) {
                entry.live = false;
            }
        }
    }
}

/// Running background merger.
pub struct MergerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<usize>>,
}

impl MergerHandle {
    /// Stop the merger after one final merge. Returns the total records it
    /// wrote over its lifetime.
    pub async fn shutdown(self) -> Result<usize> {
        // The task may already have exited; the final merge still runs below
        let _ = self.shutdown.send(());
        self.task
            .await
            .map_err(|e| AtlasError::Io(std::io::Error::other(e.to_string())))?
    }
}

/// Spawn the periodic merger.
pub fn spawn_merger(log: Arc<ProvenanceLog>, interval: Duration) -> MergerHandle {
    let (shutdown, mut stop) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut total = 0;
        info!(dir = %log.dir().display(), ?interval, "Starting provenance merger");
        loop {
            tokio::select! {
                _ = ticker.tick() => match log.merge().await {
                    Ok(written) => total += written,
                    Err(e) => warn!(error = %e, "Provenance merge failed"),
                },
                _ = &mut stop => break,
            }
        }
        total += log.merge().await?;
        info!(records = total, "Provenance merger stopped");
        Ok::<usize, AtlasError>(total)
    });
    MergerHandle { shutdown, task }
}

/// Open the configured log and start its merger.
pub fn start(config: &ProvenanceConfig) -> (Arc<ProvenanceLog>, MergerHandle) {
    let log = ProvenanceLog::new(&config.log_dir);
    let merger = spawn_merger(
        Arc::clone(&log),
        Duration::from_secs(config.merge_interval_secs.max(1)),
    );
    (log, merger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExcludedFeature, GranularityTier};

    fn trail(key: &str) -> ResolutionTrail {
        ResolutionTrail {
            boundary_key: key.to_string(),
            why: vec!["tier 1 (district): accepted".to_string()],
            tried: vec![GranularityTier::District],
            blocked: None,
            accepted: Some(format!("{}-source", key)),
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn test_shard_key() {
        assert_eq!(shard_key("us-wa-seattle"), "us-wa");
        assert_eq!(shard_key("US-CA-San Jose"), "us-ca");
        assert_eq!(shard_key("gb"), "gb");
        assert_eq!(shard_key(""), "unknown");
        assert_eq!(shard_key("../../etc"), "etc");
    }

    #[tokio::test]
    async fn test_merge_into_shards() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProvenanceLog::new(dir.path());
        let a = log.writer();
        let b = log.writer();

        a.record("us-wa-seattle", trail("us-wa-seattle"));
        b.record("us-wa-tacoma", trail("us-wa-tacoma"));
        b.record("us-or-portland", trail("us-or-portland"));
        assert_eq!(log.pending(), 3);

        assert_eq!(log.merge().await.unwrap(), 3);
        assert_eq!(log.pending(), 0);
        assert_eq!(log.merge().await.unwrap(), 0);

        let wa = log.read_shard("us-wa").await.unwrap();
        assert_eq!(wa.len(), 2);
        assert!(wa.iter().any(|r| r.writer == a.id()));
        assert_eq!(log.read_shard("us-or").await.unwrap().len(), 1);
        assert!(log.read_shard("us-tx").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProvenanceLog::new(dir.path());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let writer = log.writer();
            tasks.push(tokio::spawn(async move {
                for j in 0..25 {
                    let jurisdiction = format!("us-s{}-city{}", i % 2, j);
                    writer.record(&jurisdiction, trail(&jurisdiction));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(log.merge().await.unwrap(), 200);
        assert_eq!(log.read_shard("us-s0").await.unwrap().len(), 100);
        assert_eq!(log.read_shard("us-s1").await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_dropped_writers_released() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProvenanceLog::new(dir.path());

        drop(log.writer());
        assert_eq!(log.staged_writers(), 0);

        let writer = log.writer();
        writer.record_with_exclusions(
            "us-wa-seattle",
            trail("us-wa-seattle"),
            vec![ExcludedFeature {
                jurisdiction: "us-wa-seattle".to_string(),
                index: 7,
                reason: "ring 0 is not closed".to_string(),
            }],
        );
        drop(writer);
        // Unmerged records outlive the writer
        assert_eq!(log.staged_writers(), 1);
        assert_eq!(log.pending(), 1);

        assert_eq!(log.merge().await.unwrap(), 1);
        assert_eq!(log.staged_writers(), 0);
        let wa = log.read_shard("us-wa").await.unwrap();
        assert_eq!(wa[0].excluded[0].index, 7);

        // A live writer keeps its entry across merges
        let writer = log.writer();
        writer.record("us-wa-tacoma", trail("us-wa-tacoma"));
        log.merge().await.unwrap();
        assert_eq!(log.staged_writers(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_dir_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("audit");
        std::fs::write(&blocked, b"not a directory").unwrap();
        let log = ProvenanceLog::new(&blocked);

        let writer = log.writer();
        writer.record("us-wa-seattle", trail("us-wa-seattle"));
        assert!(log.merge().await.is_err());
        assert_eq!(log.pending(), 1);
    }

    #[tokio::test]
    async fn test_failed_shard_restaged_for_next_merge() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProvenanceLog::new(dir.path());
        // A directory where the us-wa shard file should be
        let obstruction = dir.path().join("us-wa.jsonl");
        std::fs::create_dir(&obstruction).unwrap();

        let writer = log.writer();
        writer.record("us-or-portland", trail("us-or-portland"));
        writer.record("us-wa-seattle", trail("us-wa-seattle"));
        drop(writer);

        assert!(log.merge().await.is_err());
        assert_eq!(log.pending(), 1);
        assert_eq!(log.read_shard("us-or").await.unwrap().len(), 1);

        std::fs::remove_dir(&obstruction).unwrap();
        assert_eq!(log.merge().await.unwrap(), 1);
        assert_eq!(log.pending(), 0);
        assert_eq!(log.staged_writers(), 0);
        let wa = log.read_shard("us-wa").await.unwrap();
        assert_eq!(wa.len(), 1);
        assert_eq!(wa[0].jurisdiction, "us-wa-seattle");
    }

    #[tokio::test]
    async fn test_merger_final_merge_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProvenanceLog::new(dir.path());
        let merger = spawn_merger(Arc::clone(&log), Duration::from_secs(3600));

        let writer = log.writer();
        writer.record("us-wa-seattle", trail("us-wa-seattle"));

        assert_eq!(merger.shutdown().await.unwrap(), 1);
        assert_eq!(log.read_shard("us-wa").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProvenanceConfig {
            log_dir: dir.path().join("audit"),
            merge_interval_secs: 1,
        };
        let (log, merger) = start(&config);
        assert_eq!(log.dir(), config.log_dir.as_path());

        log.writer().record("us-or-portland", trail("us-or-portland"));
        merger.shutdown().await.unwrap();
        assert_eq!(log.read_shard("us-or").await.unwrap().len(), 1);
    }
}

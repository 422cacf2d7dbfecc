// Job records read and written by the trigger-driven runner

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    errors::JobStoreError,
    models::{ExecutionLogEntry, ReservationRequest},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Done,
    Failed,
    Error,
}

/// One scheduled booking job and, once run, its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    #[serde(flatten)]
    pub reservation: ReservationRequest,
    pub target_instant: DateTime<Utc>,
    pub status: JobStatus,
    #[serde(default)]
    pub confirmation: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_log: Vec<ExecutionLogEntry>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job_id: impl Into<String>, reservation: ReservationRequest, target_instant: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            reservation,
            target_instant,
            status: JobStatus::Pending,
            confirmation: None,
            error: None,
            execution_log: Vec::new(),
            updated_at: None,
        }
    }

    pub fn finish(
        &mut self,
        status: JobStatus,
        confirmation: Option<String>,
        error: Option<String>,
        execution_log: Vec<ExecutionLogEntry>,
    ) {
        self.status = status;
        self.confirmation = confirmation;
        self.error = error;
        self.execution_log = execution_log;
        self.updated_at = Some(Utc::now());
    }
}

#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    async fn load(&self, job_id: &str) -> Result<JobRecord, JobStoreError>;

    async fn save(&self, record: &JobRecord) -> Result<(), JobStoreError>;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<String, JobRecord>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: JobRecord) {
        self.jobs.insert(record.job_id.clone(), record);
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.get(job_id).map(|r| r.value().clone())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn load(&self, job_id: &str) -> Result<JobRecord, JobStoreError> {
        self.get(job_id)
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))
    }

    async fn save(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        self.insert(record.clone());
        Ok(())
    }
}

/// One pretty-printed JSON document per job, named `<job_id>.json`.
pub struct JsonFileJobStore {
    dir: PathBuf,
}

impl JsonFileJobStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, job_id: &str) -> Result<PathBuf, JobStoreError> {
        let valid = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(JobStoreError::InvalidId(job_id.to_string()));
        }
        Ok(self.dir.join(format!("{job_id}.json")))
    }
}

#[async_trait]
impl JobStore for JsonFileJobStore {
    async fn load(&self, job_id: &str) -> Result<JobRecord, JobStoreError> {
        let path = self.path_for(job_id)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(JobStoreError::NotFound(job_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    async fn save(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let path = self.path_for(&record.job_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // readers only ever see a complete document
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(job_id = %record.job_id, status = ?record.status, "job record saved");
        Ok(())
    }
}

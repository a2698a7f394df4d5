//! Background job tracking and progress event fan-out.
//!
//! Parse and scrape work runs as background jobs identified by UUID. Each
//! job carries a broadcast channel; any number of SSE clients can subscribe
//! and a slow or dropped subscriber never affects the others.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Channel capacity for job events. A subscriber that falls further behind
/// than this sees a lag error and resyncs from the progress endpoint.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long finished jobs stay queryable before cleanup.
const JOB_RETENTION: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Parse,
    Scrape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

/// In-memory record of a background job.
///
/// Jobs are ephemeral: a restart loses them, but reference status lives in
/// the database so only the live progress stream is lost.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    /// Page the job is working on; set once the page row exists.
    pub page_id: Option<i64>,
    /// References a scrape job covers. Empty for parse jobs.
    pub reference_ids: Vec<i64>,
    pub error: Option<String>,
}

/// Events broadcast while a job runs.
///
/// Each variant is serialized as internally-tagged JSON
/// (`"type": "variant_name"`) and sent as an SSE `event:` with the matching
/// name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A reference entered the scraping state.
    ReferenceScraping {
        job_id: Uuid,
        reference_id: i64,
        url: String,
    },

    /// A reference reached a terminal state.
    ReferenceFinished {
        job_id: Uuid,
        reference_id: i64,
        status: String,
        error: Option<String>,
    },

    /// The job finished; counts cover the whole batch.
    JobCompleted {
        job_id: Uuid,
        scraped: i64,
        failed: i64,
    },
}

impl JobEvent {
    /// Returns the SSE `event:` field name for this event.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            JobEvent::ReferenceScraping { .. } => "reference_scraping",
            JobEvent::ReferenceFinished { .. } => "reference_finished",
            JobEvent::JobCompleted { .. } => "job_completed",
        }
    }
}

struct JobEntry {
    job: Job,
    events: broadcast::Sender<JobEvent>,
    completed_at: Option<Instant>,
}

/// Registry of in-flight and recently finished jobs.
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new running job and return its id.
    pub async fn create(&self, kind: JobKind) -> Uuid {
        let id = Uuid::new_v4();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let job = Job {
            id,
            kind,
            state: JobState::Running,
            created_at: Utc::now(),
            page_id: None,
            reference_ids: Vec::new(),
            error: None,
        };

        let mut jobs = self.jobs.write().await;
        Self::cleanup_old_jobs(&mut jobs);
        jobs.insert(
            id,
            JobEntry {
                job,
                events,
                completed_at: None,
            },
        );
        id
    }

    pub async fn get(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&job_id).map(|e| e.job.clone())
    }

    /// Attach the page a job is working on.
    pub async fn set_page(&self, job_id: Uuid, page_id: i64) {
        if let Some(entry) = self.jobs.write().await.get_mut(&job_id) {
            entry.job.page_id = Some(page_id);
        }
    }

    /// Record which references a scrape job covers.
    pub async fn set_references(&self, job_id: Uuid, reference_ids: Vec<i64>) {
        if let Some(entry) = self.jobs.write().await.get_mut(&job_id) {
            entry.job.reference_ids = reference_ids;
        }
    }

    /// Subscribe to a job's event stream. `None` for unknown jobs.
    pub async fn subscribe(&self, job_id: Uuid) -> Option<broadcast::Receiver<JobEvent>> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(|e| e.events.subscribe())
    }

    /// Broadcast an event to a job's subscribers.
    ///
    /// Best-effort: a send with no live receivers is not an error, and one
    /// lagging subscriber never blocks delivery to the rest.
    pub async fn broadcast(&self, job_id: Uuid, event: JobEvent) {
        if let Some(entry) = self.jobs.read().await.get(&job_id) {
            let _ = entry.events.send(event);
        }
    }

    /// Mark a job finished.
    pub async fn complete(&self, job_id: Uuid, result: Result<(), String>) {
        if let Some(entry) = self.jobs.write().await.get_mut(&job_id) {
            entry.completed_at = Some(Instant::now());
            match result {
                Ok(()) => entry.job.state = JobState::Completed,
                Err(error) => {
                    entry.job.state = JobState::Failed;
                    entry.job.error = Some(error);
                }
            }
        }
    }

    /// Drop finished jobs older than [`JOB_RETENTION`].
    fn cleanup_old_jobs(jobs: &mut HashMap<Uuid, JobEntry>) {
        jobs.retain(|_, entry| {
            entry
                .completed_at
                .map(|t| t.elapsed() < JOB_RETENTION)
                .unwrap_or(true)
        });
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

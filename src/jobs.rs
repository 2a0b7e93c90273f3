use crate::{models::ProcessResult, pipeline::Pipeline};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("batch worker is not available")]
    WorkerUnavailable,
}

/// Accepts batches and runs them one after another on a single worker task.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<JobTable>>,
}

/// Job states plus the order in which jobs finished. Only the newest
/// `retention` finished jobs are kept; queued and running jobs never expire.
struct JobTable {
    states: HashMap<Uuid, JobState>,
    finished: VecDeque<Uuid>,
    retention: usize,
}

impl JobTable {
    fn new(retention: usize) -> Self {
        Self {
            states: HashMap::new(),
            finished: VecDeque::new(),
            retention: retention.max(1),
        }
    }

    fn finish(&mut self, id: Uuid, state: JobState) {
        self.states.insert(id, state);
        self.finished.push_back(id);
        while self.finished.len() > self.retention {
            if let Some(expired) = self.finished.pop_front() {
                self.states.remove(&expired);
                debug!(target = "relay.jobs", job_id = %expired, "job_pruned");
            }
        }
    }
}

struct Job {
    id: Uuid,
    asins: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued { total: usize },
    Running { total: usize },
    Completed { results: Vec<ProcessResult> },
    Cancelled { results: Vec<ProcessResult> },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    /// Starts the worker. Once `cancel` flips to `true` the running batch stops
    /// before its next item and every later batch finishes as cancelled.
    pub fn spawn(
        pipeline: Pipeline,
        capacity: usize,
        retention: usize,
        cancel: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses = Arc::new(Mutex::new(JobTable::new(retention)));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let total = job.asins.len();
                statuses_bg
                    .lock()
                    .await
                    .states
                    .insert(job.id, JobState::Running { total });
                info!(target = "relay.jobs", job_id = %job.id, total, "batch_started");

                let outcome = pipeline
                    .bulk_process_until(&job.asins, cancel.clone())
                    .await;
                let succeeded = outcome.results.iter().filter(|r| r.success).count();
                let state = if outcome.cancelled {
                    warn!(target = "relay.jobs", job_id = %job.id, processed = outcome.results.len(), total, "batch_cancelled");
                    JobState::Cancelled {
                        results: outcome.results,
                    }
                } else {
                    info!(target = "relay.jobs", job_id = %job.id, succeeded, total, "batch_completed");
                    JobState::Completed {
                        results: outcome.results,
                    }
                };
                statuses_bg.lock().await.finish(job.id, state);
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue_batch(&self, asins: Vec<String>) -> Result<Uuid, JobError> {
        let id = Uuid::new_v4();
        self.statuses
            .lock()
            .await
            .states
            .insert(id, JobState::Queued { total: asins.len() });
        if self.tx.send(Job { id, asins }).await.is_err() {
            self.statuses.lock().await.states.remove(&id);
            return Err(JobError::WorkerUnavailable);
        }
        info!(target = "relay.jobs", job_id = %id, "batch_enqueued");
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.states.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::harness;
    use tokio::time::{Duration, sleep};

    async fn wait_finished(queue: &JobQueue, id: Uuid) -> JobState {
        for _ in 0..500 {
            if let Some(info) = queue.get(id).await {
                if matches!(
                    info.state,
                    JobState::Completed { .. } | JobState::Cancelled { .. }
                ) {
                    return info.state;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test(start_paused = true)]
    async fn batch_runs_to_completion() {
        let h = harness(&["B01", "B02"], true, Some("x"));
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (queue, _worker) = JobQueue::spawn(h.pipeline.clone(), 4, 16, cancel_rx);

        let id = queue
            .enqueue_batch(vec!["B01".into(), "B02".into()])
            .await
            .unwrap();
        match wait_finished(&queue, id).await {
            JobState::Completed { results } => {
                assert_eq!(results.len(), 2);
                assert!(results.iter().all(|r| r.success));
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let h = harness(&["B01"], true, Some("x"));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();
        let (queue, _worker) = JobQueue::spawn(h.pipeline.clone(), 4, 16, cancel_rx);

        let id = queue.enqueue_batch(vec!["B01".into()]).await.unwrap();
        match wait_finished(&queue, id).await {
            JobState::Cancelled { results } => assert!(results.is_empty()),
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(h.pipeline.store().count_items().unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let h = harness(&[], true, Some("x"));
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (queue, _worker) = JobQueue::spawn(h.pipeline.clone(), 1, 16, cancel_rx);
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn oldest_finished_jobs_are_pruned() {
        let h = harness(&["B01"], true, Some("x"));
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (queue, _worker) = JobQueue::spawn(h.pipeline.clone(), 8, 2, cancel_rx);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = queue.enqueue_batch(vec!["B01".into()]).await.unwrap();
            wait_finished(&queue, id).await;
            ids.push(id);
        }

        assert!(queue.get(ids[0]).await.is_none());
        assert!(queue.get(ids[1]).await.is_some());
        assert!(queue.get(ids[2]).await.is_some());
        assert_eq!(queue.statuses.lock().await.states.len(), 2);
    }

    #[test]
    fn job_info_serializes_state_tag() {
        let info = JobInfo {
            id: "abc".into(),
            state: JobState::Queued { total: 3 },
        };
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            serde_json::json!({"id": "abc", "state": "queued", "total": 3})
        );
    }
}

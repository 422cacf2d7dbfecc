// Wait-then-execute drivers: an in-process timed driver and a job runner
// started by a coarse external trigger

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{
    api::ReservationApi,
    booker::Booker,
    config::DriverConfig,
    errors::{ApiError, JobStoreError, Result},
    job_store::{JobRecord, JobStatus, JobStore},
    models::{AttemptStatus, ExecutionLogEntry, ReservationRequest, TimedReservationRequest},
    retry::exponential_backoff,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    Waiting { target: DateTime<Utc> },
    Attempting,
    Done { confirmation: String },
    Failed { error: String },
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DriverState::Done { .. } | DriverState::Failed { .. })
    }
}

/// Sleeps in `poll` sized chunks until the wall clock reaches `target`,
/// logging a heartbeat at most once per `heartbeat`. Returns the number of
/// heartbeats logged.
pub async fn wait_until(target: DateTime<Utc>, poll: Duration, heartbeat: Duration) -> u32 {
    let poll = poll.max(Duration::from_millis(1));
    let mut last_heartbeat: Option<Instant> = None;
    let mut heartbeats = 0;

    loop {
        let remaining = match (target - Utc::now()).to_std() {
            Ok(remaining) if !remaining.is_zero() => remaining,
            _ => break,
        };

        if last_heartbeat.map_or(true, |at| at.elapsed() >= heartbeat) {
            info!(target = %target, remaining_secs = remaining.as_secs_f64(), "waiting for release");
            last_heartbeat = Some(Instant::now());
            heartbeats += 1;
        }
        tokio::time::sleep(remaining.min(poll)).await;
    }
    heartbeats
}

/// One sleep for the whole remaining delta, then millisecond steps until the
/// wall clock has caught up.
pub async fn sleep_until_precise(target: DateTime<Utc>) {
    if let Ok(remaining) = (target - Utc::now()).to_std() {
        tokio::time::sleep(remaining).await;
    }
    while Utc::now() < target {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub struct TimedDriver<A: ReservationApi> {
    booker: Arc<Booker<A>>,
    config: DriverConfig,
}

impl<A: ReservationApi> TimedDriver<A> {
    pub fn new(booker: Arc<Booker<A>>, config: DriverConfig) -> Self {
        Self { booker, config }
    }

    /// Release instant for `day`, read in local time.
    pub fn target_for(request: &TimedReservationRequest, day: NaiveDate) -> Result<DateTime<Utc>> {
        let local = request.drop_time_on(day)?;
        Local
            .from_local_datetime(&local)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| ApiError::InvalidRequest(format!("{local} does not exist in local time")))
    }

    /// Waits for today's release time and then runs the retrying booking flow once.
    pub async fn run(&self, request: &TimedReservationRequest) -> DriverState {
        match Self::target_for(request, Local::now().date_naive()) {
            Ok(target) => self.run_at(&request.reservation_request, target).await,
            Err(e) => transition(DriverState::Failed { error: e.to_string() }),
        }
    }

    pub async fn run_at(&self, request: &ReservationRequest, target: DateTime<Utc>) -> DriverState {
        transition(DriverState::Waiting { target });
        wait_until(target, self.config.poll_interval(), self.config.heartbeat_interval()).await;

        transition(DriverState::Attempting);
        let mut policy = self.booker.new_retry_policy();
        match self.booker.make_reservation_with_retries(request, &mut policy).await {
            Ok(confirmation) => transition(DriverState::Done { confirmation }),
            Err(e) => transition(DriverState::Failed { error: e.to_string() }),
        }
    }
}

fn transition(state: DriverState) -> DriverState {
    match &state {
        DriverState::Waiting { target } => info!(target = %target, "driver waiting"),
        DriverState::Attempting => info!("driver attempting"),
        DriverState::Done { .. } => info!("driver done"),
        DriverState::Failed { error } => error!(error = %error, "driver failed"),
    }
    state
}

struct RunOutcome {
    status: JobStatus,
    confirmation: Option<String>,
    error: Option<String>,
    log: Vec<ExecutionLogEntry>,
}

/// Runs stored booking jobs. Each job sleeps to its target instant and then
/// makes single attempts until it books or the run deadline passes.
pub struct JobRunner<A: ReservationApi, S: JobStore> {
    booker: Arc<Booker<A>>,
    store: Arc<S>,
    config: DriverConfig,
}

impl<A: ReservationApi, S: JobStore> JobRunner<A, S> {
    pub fn new(booker: Arc<Booker<A>>, store: Arc<S>, config: DriverConfig) -> Self {
        Self { booker, store, config }
    }

    pub async fn run_job(&self, job_id: &str) -> std::result::Result<JobRecord, JobStoreError> {
        let mut record = self.store.load(job_id).await?;
        if record.status != JobStatus::Pending {
            info!(job_id, status = ?record.status, "job already finished, skipping");
            return Ok(record);
        }

        let outcome = match record.reservation.validate() {
            Ok(()) => {
                info!(job_id, target = %record.target_instant, "job sleeping until target");
                sleep_until_precise(record.target_instant).await;
                self.attempt_until_deadline(job_id, &record.reservation).await
            }
            Err(e) => RunOutcome {
                status: JobStatus::Error,
                confirmation: None,
                error: Some(e.to_string()),
                log: Vec::new(),
            },
        };

        info!(
            job_id,
            status = ?outcome.status,
            attempts = outcome.log.len(),
            confirmation = ?outcome.confirmation,
            error = ?outcome.error,
            "job finished"
        );
        record.finish(outcome.status, outcome.confirmation, outcome.error, outcome.log);

        if let Err(e) = self.store.save(&record).await {
            error!(
                job_id,
                status = ?record.status,
                confirmation = ?record.confirmation,
                error = %e,
                "job outcome not persisted"
            );
            return Err(JobStoreError::Unsaved {
                record: Box::new(record),
                source: Box::new(e),
            });
        }
        Ok(record)
    }

    async fn attempt_until_deadline(&self, job_id: &str, request: &ReservationRequest) -> RunOutcome {
        let started = Instant::now();
        let deadline = started + self.config.deadline();
        let base = Duration::from_millis(self.config.initial_backoff_ms);
        let cap = Duration::from_millis(self.config.max_backoff_ms);
        let pause = Duration::from_millis(self.config.failed_attempt_pause_ms);

        let mut log = Vec::new();
        let mut rate_limits = 0u32;
        let mut last_error: Option<String> = None;

        while Instant::now() < deadline {
            let err = match self.booker.make_reservation(request).await {
                Ok(confirmation) => {
                    log.push(ExecutionLogEntry::new(
                        AttemptStatus::Success,
                        format!("booked: {confirmation}"),
                        started.elapsed(),
                    ));
                    return RunOutcome {
                        status: JobStatus::Done,
                        confirmation: Some(confirmation),
                        error: None,
                        log,
                    };
                }
                Err(err) => err,
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            match err {
                ApiError::RateLimit { .. } => {
                    let delay = exponential_backoff(rate_limits, base, cap);
                    rate_limits += 1;
                    warn!(job_id, delay_ms = delay.as_millis() as u64, "rate limited");
                    log.push(ExecutionLogEntry::new(
                        AttemptStatus::RateLimited,
                        format!("rate limited, backing off {}ms", delay.as_millis()),
                        started.elapsed(),
                    ));
                    last_error = Some(err.to_string());
                    tokio::time::sleep(delay.min(remaining)).await;
                }
                ApiError::Auth(_) | ApiError::InvalidRequest(_) => {
                    error!(job_id, error = %err, "attempt cannot succeed, stopping");
                    log.push(ExecutionLogEntry::new(AttemptStatus::Error, err.to_string(), started.elapsed()));
                    return RunOutcome {
                        status: JobStatus::Error,
                        confirmation: None,
                        error: Some(err.to_string()),
                        log,
                    };
                }
                other => {
                    warn!(job_id, error = %other, "attempt failed");
                    log.push(ExecutionLogEntry::new(AttemptStatus::Error, other.to_string(), started.elapsed()));
                    last_error = Some(other.to_string());
                    tokio::time::sleep(pause.min(remaining)).await;
                }
            }
        }

        let deadline_secs = self.config.deadline().as_secs_f64();
        RunOutcome {
            status: JobStatus::Failed,
            confirmation: None,
            error: Some(match last_error {
                Some(last) => format!("deadline of {deadline_secs}s elapsed: {last}"),
                None => format!("deadline of {deadline_secs}s elapsed"),
            }),
            log,
        }
    }
}

// Attempt orchestration: single and raced booking attempts wrapped in the retry policy

use std::{sync::Arc, time::Duration};

use chrono::{Local, NaiveDate};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    api::ReservationApi,
    config::{RaceConfig, RetryConfig},
    errors::{ApiError, Result},
    models::{BookingOutcome, BookingToken, ReservationRequest, Slot},
    retry::RetryPolicy,
    selector::{rank_slots, select_slot, SelectionCriteria},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptMode {
    Single,
    Parallel(usize),
}

impl AttemptMode {
    pub fn from_config(config: &RaceConfig) -> Self {
        match config.parallel_candidates {
            0 | 1 => AttemptMode::Single,
            n => AttemptMode::Parallel(n),
        }
    }
}

// An expired token is treated like a lost slot so the caller fetches afresh
async fn submit<A: ReservationApi>(api: &A, token: &BookingToken) -> Result<String> {
    if token.is_expired(Local::now().naive_local()) {
        warn!(expires = ?token.date_expires, "booking token expired before submit");
        return Err(ApiError::slot_taken());
    }
    match api.book_slot(token).await? {
        BookingOutcome::Confirmed(confirmation) => Ok(confirmation),
        BookingOutcome::SlotTaken => Err(ApiError::slot_taken()),
    }
}

// Token exchange then submit for one candidate.
// Ok(None) means the race was already won before this worker got to a call.
async fn book_candidate<A: ReservationApi>(
    api: Arc<A>,
    slot: Slot,
    party_size: u32,
    day: NaiveDate,
    cancel: CancellationToken,
) -> Result<Option<String>> {
    if cancel.is_cancelled() {
        return Ok(None);
    }
    let token = api.get_booking_token(&slot, party_size, day).await?;

    if cancel.is_cancelled() {
        debug!(slot = %slot.start(), "race already won, skipping submit");
        return Ok(None);
    }
    submit(&*api, &token).await.map(Some)
}

/// Folds the failures of a race with no winner into one error.
///
/// A rate limit from any worker wins, carrying the longest server hint, so
/// the retry wrapper backs off instead of counting a taken slot. Otherwise
/// the failures are aggregated as `SlotTaken`.
fn race_failure(mut failures: Vec<ApiError>) -> ApiError {
    let throttled = failures
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_rate_limit())
        .max_by_key(|(_, e)| e.retry_after())
        .map(|(idx, _)| idx);

    match throttled {
        Some(idx) => {
            debug!(failures = failures.len(), "race throttled");
            failures.swap_remove(idx)
        }
        None => ApiError::SlotTaken { failures },
    }
}

pub struct Booker<A: ReservationApi> {
    api: Arc<A>,
    retry_config: RetryConfig,
    mode: AttemptMode,
}

impl<A: ReservationApi> Booker<A> {
    pub fn new(api: Arc<A>, retry_config: RetryConfig, race_config: &RaceConfig) -> Self {
        Self {
            api,
            retry_config,
            mode: AttemptMode::from_config(race_config),
        }
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn mode(&self) -> AttemptMode {
        self.mode
    }

    /// Retry policy with fresh backoff state, one per job run.
    pub fn new_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.retry_config)
    }

    async fn fetch_slots(&self, request: &ReservationRequest, day: NaiveDate) -> Result<Vec<Slot>> {
        let slots = self
            .api
            .find_booking_slots(request.venue_id, request.party_size, day)
            .await?;
        if slots.is_empty() {
            return Err(ApiError::NoSlots);
        }
        Ok(slots)
    }

    /// Find, select the nearest slot, exchange it for a token and book it.
    pub async fn make_reservation(&self, request: &ReservationRequest) -> Result<String> {
        let today = Local::now().date_naive();
        let day = request.target_date(today)?;
        let criteria = SelectionCriteria::from_request(request, today)?;

        let slots = self.fetch_slots(request, day).await?;
        let slot = select_slot(&slots, &criteria)?;
        info!(slot = %slot.start(), slot_type = slot.slot_type(), candidates = slots.len(), "selected slot");

        let token = self
            .api
            .get_booking_token(slot, request.party_size, day)
            .await?;
        let confirmation = submit(&*self.api, &token).await?;
        info!(slot = %slot.start(), "reservation confirmed");
        Ok(confirmation)
    }

    /// Races the top `n` candidates and returns the first confirmation.
    ///
    /// Losing workers are left to finish whatever call they are in, so a
    /// sibling submit may still land after a winner is returned.
    pub async fn make_reservation_parallel(&self, request: &ReservationRequest, n: usize) -> Result<String> {
        let today = Local::now().date_naive();
        let day = request.target_date(today)?;
        let criteria = SelectionCriteria::from_request(request, today)?;

        let slots = self.fetch_slots(request, day).await?;
        let ranked = rank_slots(&slots, &criteria, n.max(1));
        if ranked.is_empty() {
            return Err(ApiError::NoAcceptableSlot);
        }
        info!(candidates = ranked.len(), "racing booking candidates");

        let cancel = CancellationToken::new();
        let mut workers = JoinSet::new();
        for slot in ranked {
            workers.spawn(book_candidate(
                Arc::clone(&self.api),
                slot.clone(),
                request.party_size,
                day,
                cancel.clone(),
            ));
        }

        let mut failures = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(Some(confirmation))) => {
                    cancel.cancel();
                    // dropping the set would abort in-flight calls
                    workers.detach_all();
                    info!(failed_before_win = failures.len(), "race won");
                    return Ok(confirmation);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    debug!(error = %e, "race candidate failed");
                    failures.push(e);
                }
                Err(join_error) => warn!(error = %join_error, "race worker panicked"),
            }
        }

        Err(race_failure(failures))
    }

    async fn attempt(&self, request: &ReservationRequest) -> Result<String> {
        match self.mode {
            AttemptMode::Single => self.make_reservation(request).await,
            AttemptMode::Parallel(n) => self.make_reservation_parallel(request, n).await,
        }
    }

    /// Runs attempts in the configured mode until one succeeds or the
    /// policy's attempts are used up.
    ///
    /// Rate limits sleep and do not count as an attempt. No slots, network
    /// failures and (when enabled) taken slots count and retry. Anything
    /// else is returned as is.
    pub async fn make_reservation_with_retries(
        &self,
        request: &ReservationRequest,
        policy: &mut RetryPolicy,
    ) -> Result<String> {
        request.validate()?;

        let mut consumed = 0u32;
        let mut last: Option<ApiError> = None;

        while consumed < policy.max_attempts {
            let err = match self.attempt(request).await {
                Ok(confirmation) => return Ok(confirmation),
                Err(err) => err,
            };

            match err {
                ApiError::RateLimit { .. } => {
                    let hint = err.retry_after().map(Duration::from_secs);
                    let delay = policy.backoff.next_rate_limit_delay(hint);
                    warn!(delay_ms = delay.as_millis() as u64, attempts = consumed, "rate limited, backing off");
                    tokio::time::sleep(delay).await;
                    last = Some(err);
                    continue;
                }
                ApiError::NoSlots => {}
                ApiError::SlotTaken { .. } if policy.retry_on_taken_slot => {}
                ref e if e.is_network() => {}
                other => return Err(other),
            }

            consumed += 1;
            info!(attempt = consumed, max_attempts = policy.max_attempts, error = %err, "attempt failed, retrying");
            last = Some(err);

            if !policy.delay.is_zero() && consumed < policy.max_attempts {
                tokio::time::sleep(policy.delay).await;
            }
        }

        Err(ApiError::ExhaustedRetries {
            attempts: consumed,
            last: last.map(Box::new),
        })
    }
}

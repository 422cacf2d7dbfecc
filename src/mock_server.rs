// Scripted in-process backend for orchestrator and driver tests

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use crate::{
    api::ReservationApi,
    errors::{ApiError, ResponseDetails, Result},
    models::{BookingOutcome, BookingToken, Slot, SlotConfig, SlotDate, SlotPayment},
};

/// A connection-refused error from a real socket.
pub async fn network_error() -> ApiError {
    let err = reqwest::Client::new()
        .get("http://127.0.0.1:1/")
        .send()
        .await
        .expect_err("nothing listens on port 1");
    ApiError::Network(err)
}

pub fn rate_limited(endpoint: &str, retry_after: Option<u64>) -> ApiError {
    ApiError::from_status(ResponseDetails::new(429, "Too Many Requests", endpoint), retry_after)
}

pub fn slot_at(day: NaiveDate, hour: u32, minute: u32, slot_type: &str) -> Slot {
    let start = day.and_hms_opt(hour, minute, 0).expect("valid time");
    Slot {
        config: SlotConfig {
            id: i64::from(hour * 100 + minute),
            slot_type: slot_type.to_string(),
            token: format!("config-{hour:02}{minute:02}"),
        },
        date: SlotDate {
            start,
            end: start + chrono::Duration::hours(2),
        },
        payment: SlotPayment::default(),
    }
}

// What the next find call returns
pub enum FindStep {
    Slots(Vec<Slot>),
    Fail(ApiError),
}

// How booking a given slot behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookStep {
    Confirm,
    Taken,
    ServerError,
}

pub struct MockServer {
    find_script: Mutex<VecDeque<FindStep>>,
    default_slots: Mutex<Vec<Slot>>,
    book_steps: Mutex<HashMap<i64, BookStep>>,
    book_delays: Mutex<HashMap<i64, Duration>>,
    token_failures: Mutex<VecDeque<ApiError>>,
    token_delays: Mutex<HashMap<i64, Duration>>,
    pub find_calls: AtomicUsize,
    pub token_calls: AtomicUsize,
    pub book_calls: AtomicUsize,
    call_times: Mutex<Vec<DateTime<Utc>>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            find_script: Mutex::new(VecDeque::new()),
            default_slots: Mutex::new(Vec::new()),
            book_steps: Mutex::new(HashMap::new()),
            book_delays: Mutex::new(HashMap::new()),
            token_failures: Mutex::new(VecDeque::new()),
            token_delays: Mutex::new(HashMap::new()),
            find_calls: AtomicUsize::new(0),
            token_calls: AtomicUsize::new(0),
            book_calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    pub fn with_slots(slots: Vec<Slot>) -> Self {
        let server = Self::new();
        *server.default_slots.lock() = slots;
        server
    }

    /// Queues a one-off find result; the default slots apply once the queue is empty.
    pub fn push_find(&self, step: FindStep) {
        self.find_script.lock().push_back(step);
    }

    pub fn set_book_step(&self, slot_id: i64, step: BookStep) {
        self.book_steps.lock().insert(slot_id, step);
    }

    pub fn set_book_delay(&self, slot_id: i64, delay: Duration) {
        self.book_delays.lock().insert(slot_id, delay);
    }

    /// Queues a failure for the next token exchange, whichever slot it is for.
    pub fn push_token_failure(&self, err: ApiError) {
        self.token_failures.lock().push_back(err);
    }

    pub fn set_token_delay(&self, slot_id: i64, delay: Duration) {
        self.token_delays.lock().insert(slot_id, delay);
    }

    pub fn calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
            + self.token_calls.load(Ordering::SeqCst)
            + self.book_calls.load(Ordering::SeqCst)
    }

    pub fn first_call_at(&self) -> Option<DateTime<Utc>> {
        self.call_times.lock().first().copied()
    }

    fn record_call(&self) {
        self.call_times.lock().push(Utc::now());
    }

    fn slot_id_from_token(token: &BookingToken) -> i64 {
        token
            .value
            .trim_start_matches("bt-")
            .parse()
            .unwrap_or_default()
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReservationApi for MockServer {
    async fn find_booking_slots(&self, _venue_id: i64, _party_size: u32, _day: NaiveDate) -> Result<Vec<Slot>> {
        self.record_call();
        self.find_calls.fetch_add(1, Ordering::SeqCst);

        let step = self.find_script.lock().pop_front();
        match step {
            Some(FindStep::Slots(slots)) => Ok(slots),
            Some(FindStep::Fail(err)) => Err(err),
            None => Ok(self.default_slots.lock().clone()),
        }
    }

    async fn get_booking_token(&self, slot: &Slot, _party_size: u32, _day: NaiveDate) -> Result<BookingToken> {
        self.record_call();
        self.token_calls.fetch_add(1, Ordering::SeqCst);

        let failure = self.token_failures.lock().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        let delay = self.token_delays.lock().get(&slot.config.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(BookingToken {
            value: format!("bt-{}", slot.config.id),
            date_expires: None,
        })
    }

    async fn book_slot(&self, token: &BookingToken) -> Result<BookingOutcome> {
        self.record_call();
        self.book_calls.fetch_add(1, Ordering::SeqCst);

        let slot_id = Self::slot_id_from_token(token);
        let delay = self.book_delays.lock().get(&slot_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let step = self
            .book_steps
            .lock()
            .get(&slot_id)
            .copied()
            .unwrap_or(BookStep::Confirm);
        match step {
            BookStep::Confirm => Ok(BookingOutcome::Confirmed(format!("conf-{slot_id}"))),
            BookStep::Taken => Ok(BookingOutcome::SlotTaken),
            BookStep::ServerError => Err(ApiError::from_status(
                ResponseDetails::new(500, "Internal Server Error", "/3/book"),
                None,
            )),
        }
    }
}

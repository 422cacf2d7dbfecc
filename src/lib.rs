// Booking-race engine for time-released restaurant reservations

pub mod api;
pub mod booker;
pub mod config;
pub mod driver;
pub mod errors;
pub mod job_store;
pub mod logging;
pub mod models;
pub mod retry;
pub mod selector;
pub mod transport;

#[cfg(test)]
mod mock_server;

// Re-export key types for convenience
pub use api::{ApiAccess, ReservationApi};
pub use booker::{AttemptMode, Booker};
pub use config::{ClientConfig, DriverConfig, RaceConfig, RetryConfig};
pub use driver::{DriverState, JobRunner, TimedDriver};
pub use errors::{ApiError, ClientError, JobStoreError};
pub use job_store::{InMemoryJobStore, JobRecord, JobStatus, JobStore, JsonFileJobStore};
pub use models::{ReservationRequest, Slot, TimedReservationRequest};
pub use selector::{rank_slots, select_slot, SelectionCriteria};

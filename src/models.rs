// Reservation requests, upstream slot/token records and per-run execution log entries

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ApiError, Result};

// Upstream timestamp format for slot start/end times
pub const SLOT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

mod slot_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::SLOT_TIME_FORMAT;

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(SLOT_TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, SLOT_TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// What to book: venue, party, ideal time with a tolerance window, and the day.
///
/// Exactly one of `ideal_date` and `days_in_advance` must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub venue_id: i64,
    pub party_size: u32,
    pub ideal_hour: u32,
    pub ideal_minute: u32,
    pub window_hours: u32,
    pub prefer_early: bool,
    #[serde(default)]
    pub preferred_type: Option<String>,
    #[serde(default)]
    pub ideal_date: Option<NaiveDate>,
    #[serde(default)]
    pub days_in_advance: Option<u32>,
}

impl ReservationRequest {
    pub fn validate(&self) -> Result<()> {
        match (self.ideal_date, self.days_in_advance) {
            (Some(_), Some(_)) => {
                return Err(ApiError::InvalidRequest(
                    "ideal_date and days_in_advance are mutually exclusive".into(),
                ))
            }
            (None, None) => {
                return Err(ApiError::InvalidRequest(
                    "one of ideal_date or days_in_advance is required".into(),
                ))
            }
            _ => {}
        }
        if self.party_size == 0 {
            return Err(ApiError::InvalidRequest("party_size must be at least 1".into()));
        }
        if self.ideal_hour > 23 || self.ideal_minute > 59 {
            return Err(ApiError::InvalidRequest(format!(
                "invalid ideal time {:02}:{:02}",
                self.ideal_hour, self.ideal_minute
            )));
        }
        Ok(())
    }

    /// Day to book, resolved against `today` when given as an offset.
    pub fn target_date(&self, today: NaiveDate) -> Result<NaiveDate> {
        self.validate()?;
        match (self.ideal_date, self.days_in_advance) {
            (Some(date), None) => Ok(date),
            (None, Some(days)) => Ok(today + Duration::days(i64::from(days))),
            _ => Err(ApiError::InvalidRequest("ambiguous target date".into())),
        }
    }

    pub fn ideal_time(&self, today: NaiveDate) -> Result<NaiveDateTime> {
        let date = self.target_date(today)?;
        date.and_hms_opt(self.ideal_hour, self.ideal_minute, 0)
            .ok_or_else(|| ApiError::InvalidRequest("ideal time out of range".into()))
    }

    pub fn window(&self) -> Duration {
        Duration::hours(i64::from(self.window_hours))
    }
}

/// A reservation plus the hour/minute at which the venue releases its tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedReservationRequest {
    pub reservation_request: ReservationRequest,
    pub expected_drop_hour: u32,
    pub expected_drop_minute: u32,
}

impl TimedReservationRequest {
    // Release instant on the given calendar day
    pub fn drop_time_on(&self, day: NaiveDate) -> Result<NaiveDateTime> {
        day.and_hms_opt(self.expected_drop_hour, self.expected_drop_minute, 0)
            .ok_or_else(|| {
                ApiError::InvalidRequest(format!(
                    "invalid drop time {:02}:{:02}",
                    self.expected_drop_hour, self.expected_drop_minute
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub id: i64,
    #[serde(rename = "type")]
    pub slot_type: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDate {
    #[serde(with = "slot_time")]
    pub start: NaiveDateTime,
    #[serde(with = "slot_time")]
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPayment {
    #[serde(default)]
    pub is_paid: bool,
}

/// One bookable time window as returned by the find endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub config: SlotConfig,
    pub date: SlotDate,
    #[serde(default)]
    pub payment: SlotPayment,
}

impl Slot {
    pub fn start(&self) -> NaiveDateTime {
        self.date.start
    }

    pub fn slot_type(&self) -> &str {
        &self.config.slot_type
    }
}

/// Short-lived token that must be exchanged for a confirmation before it expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingToken {
    pub value: String,
    #[serde(default)]
    pub date_expires: Option<String>,
}

impl BookingToken {
    // Unparseable or missing expiry is treated as still valid
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.date_expires
            .as_deref()
            .and_then(|raw| NaiveDateTime::parse_from_str(raw, SLOT_TIME_FORMAT).ok())
            .map(|expires| now >= expires)
            .unwrap_or(false)
    }
}

/// Result of a booking submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Confirmed(String),
    SlotTaken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Error,
    RateLimited,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub status: AttemptStatus,
    pub message: String,
    pub elapsed_secs: f64,
}

impl ExecutionLogEntry {
    pub fn new(status: AttemptStatus, message: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            status,
            message: message.into(),
            // whole milliseconds
            elapsed_secs: (elapsed.as_millis() as f64) / 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: i64,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub display: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(default)]
    pub payment_methods: Vec<PaymentMethod>,
}

impl AuthResponse {
    pub fn default_payment_method(&self) -> Option<&PaymentMethod> {
        self.payment_methods
            .iter()
            .find(|m| m.is_default)
            .or_else(|| self.payment_methods.first())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarInventory {
    pub reservation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub inventory: CalendarInventory,
}

impl CalendarDay {
    pub fn is_available(&self) -> bool {
        self.inventory.reservation == "available"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueId {
    pub resy: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueDetails {
    pub id: VenueId,
    pub name: String,
    #[serde(default)]
    pub url_slug: Option<String>,
    #[serde(default)]
    pub price_range: Option<u8>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default, rename = "type")]
    pub venue_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueSearchParams {
    pub query: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: u32,
    pub day: NaiveDate,
    pub party_size: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueHit {
    pub id: VenueId,
    pub name: String,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub cuisine: Vec<String>,
    #[serde(default)]
    pub price_range_id: Option<u8>,
}

/// One page of venue search results.
///
/// `reported_total` is whatever the upstream claims and is not reliable.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueSearchPage {
    pub hits: Vec<VenueHit>,
    pub reported_total: Option<u64>,
}

// Typed access to each upstream capability, built on Transport

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tracing::{debug, info};

use crate::{
    config::ClientConfig,
    errors::{ApiError, ClientError, Result},
    models::{
        AuthResponse, BookingOutcome, BookingToken, CalendarDay, Slot, VenueDetails, VenueHit,
        VenueSearchPage, VenueSearchParams,
    },
    transport::{Transport, TransportResponse},
};

pub const FIND_ENDPOINT: &str = "/4/find";
pub const DETAILS_ENDPOINT: &str = "/3/details";
pub const BOOK_ENDPOINT: &str = "/3/book";
pub const AUTH_ENDPOINT: &str = "/3/auth/password";
pub const CALENDAR_ENDPOINT: &str = "/4/venue/calendar";
pub const VENUE_ENDPOINT: &str = "/3/venue";
pub const SEARCH_ENDPOINT: &str = "/3/venuesearch/search";

const BOOKING_SOURCE_ID: &str = "resy.com-venue-details";
const DAY_FORMAT: &str = "%Y-%m-%d";

// Statuses the book endpoint uses to say someone else got the slot first
const SLOT_TAKEN_STATUSES: &[u16] = &[409, 412];

/// The booking path used by the orchestrator.
#[async_trait]
pub trait ReservationApi: Send + Sync + 'static {
    /// Slots for the first venue in the result set, ascending by start time.
    async fn find_booking_slots(
        &self,
        venue_id: i64,
        party_size: u32,
        day: NaiveDate,
    ) -> Result<Vec<Slot>>;

    async fn get_booking_token(&self, slot: &Slot, party_size: u32, day: NaiveDate) -> Result<BookingToken>;

    async fn book_slot(&self, token: &BookingToken) -> Result<BookingOutcome>;
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    results: FindResults,
}

#[derive(Debug, Deserialize)]
struct FindResults {
    #[serde(default)]
    venues: Vec<VenueSlots>,
}

#[derive(Debug, Deserialize)]
struct VenueSlots {
    #[serde(default)]
    slots: Vec<Slot>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    book_token: BookingToken,
}

#[derive(Debug, Deserialize)]
struct BookResponse {
    resy_token: String,
}

#[derive(Debug, Deserialize)]
struct CalendarResponse {
    #[serde(default)]
    scheduled: Vec<CalendarDay>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    search: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<VenueHit>,
    #[serde(default, rename = "nbHits")]
    nb_hits: Option<u64>,
}

fn decode<T: DeserializeOwned>(response: &TransportResponse) -> Result<T> {
    serde_json::from_str(&response.body)
        .map_err(|e| ApiError::schema_mismatch(&response.endpoint, &response.body, e))
}

pub struct ApiAccess {
    transport: Transport,
    payment_method_id: Option<i64>,
}

impl ApiAccess {
    pub fn new(config: &ClientConfig) -> std::result::Result<Self, ClientError> {
        Ok(Self {
            transport: Transport::new(config)?,
            payment_method_id: config.payment_method_id,
        })
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Logs in with email/password and switches the transport to the returned token.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let form = [("email", email.to_string()), ("password", password.to_string())];
        let response = self.transport.post_form(AUTH_ENDPOINT, &form).await?;
        let auth: AuthResponse = decode(&response)?;

        self.transport.set_auth_token(&auth.token);
        info!(payment_methods = auth.payment_methods.len(), "authenticated");
        Ok(auth)
    }

    pub async fn get_calendar(
        &self,
        venue_id: i64,
        num_seats: u32,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarDay>> {
        let query = [
            ("venue_id", venue_id.to_string()),
            ("num_seats", num_seats.to_string()),
            ("start_date", start.format(DAY_FORMAT).to_string()),
            ("end_date", end.format(DAY_FORMAT).to_string()),
        ];
        let response = self.transport.get(CALENDAR_ENDPOINT, &query).await?;
        let calendar: CalendarResponse = decode(&response)?;
        Ok(calendar.scheduled)
    }

    pub async fn get_venue(&self, venue_id: i64) -> Result<VenueDetails> {
        let response = self
            .transport
            .get(VENUE_ENDPOINT, &[("id", venue_id.to_string())])
            .await?;
        decode(&response)
    }

    pub async fn search_venues(&self, params: &VenueSearchParams, page: u32) -> Result<VenueSearchPage> {
        let body = json!({
            "geo": {
                "latitude": params.latitude,
                "longitude": params.longitude,
                "radius": params.radius_m,
            },
            "query": params.query,
            "per_page": params.per_page,
            "page": page,
            "slot_filter": {
                "day": params.day.format(DAY_FORMAT).to_string(),
                "party_size": params.party_size,
            },
            "types": ["venue"],
        });
        let response = self.transport.post_json(SEARCH_ENDPOINT, &body).await?;
        let search: SearchResponse = decode(&response)?;

        Ok(VenueSearchPage {
            hits: search.search.hits,
            reported_total: search.search.nb_hits,
        })
    }

    /// Pages through search results until a short or empty page.
    ///
    /// The upstream `nbHits` total is ignored.
    pub async fn search_venues_all(&self, params: &VenueSearchParams, max_pages: u32) -> Result<Vec<VenueHit>> {
        let mut venues = Vec::new();
        for page in 1..=max_pages {
            let result = self.search_venues(params, page).await?;
            let fetched = result.hits.len();
            debug!(page, fetched, reported_total = result.reported_total, "search page");

            venues.extend(result.hits);
            if fetched == 0 || fetched < params.per_page as usize {
                break;
            }
        }
        Ok(venues)
    }
}

#[async_trait]
impl ReservationApi for ApiAccess {
    async fn find_booking_slots(
        &self,
        venue_id: i64,
        party_size: u32,
        day: NaiveDate,
    ) -> Result<Vec<Slot>> {
        let query = [
            ("lat", "0".to_string()),
            ("long", "0".to_string()),
            ("day", day.format(DAY_FORMAT).to_string()),
            ("party_size", party_size.to_string()),
            ("venue_id", venue_id.to_string()),
        ];
        let response = self.transport.get(FIND_ENDPOINT, &query).await?;
        let found: FindResponse = decode(&response)?;

        let mut slots = found
            .results
            .venues
            .into_iter()
            .next()
            .map(|venue| venue.slots)
            .unwrap_or_default();
        // selection relies on ascending start times; stable so upstream order breaks ties
        slots.sort_by_key(|slot| slot.date.start);

        debug!(venue_id, %day, slots = slots.len(), "found slots");
        Ok(slots)
    }

    async fn get_booking_token(&self, slot: &Slot, party_size: u32, day: NaiveDate) -> Result<BookingToken> {
        let body = json!({
            "commit": 1,
            "config_id": slot.config.token,
            "day": day.format(DAY_FORMAT).to_string(),
            "party_size": party_size,
        });
        let response = self.transport.post_json(DETAILS_ENDPOINT, &body).await?;
        let details: DetailsResponse = decode(&response)?;
        Ok(details.book_token)
    }

    async fn book_slot(&self, token: &BookingToken) -> Result<BookingOutcome> {
        let mut form = vec![
            ("book_token", token.value.clone()),
            ("source_id", BOOKING_SOURCE_ID.to_string()),
        ];
        if let Some(id) = self.payment_method_id {
            form.push(("struct_payment_method", json!({ "id": id }).to_string()));
        }

        let response = match self.transport.post_form(BOOK_ENDPOINT, &form).await {
            Ok(response) => response,
            Err(ApiError::Http(details)) if SLOT_TAKEN_STATUSES.contains(&details.status) => {
                info!(status = details.status, "slot already taken");
                return Ok(BookingOutcome::SlotTaken);
            }
            Err(e) => return Err(e),
        };

        let booked: BookResponse = decode(&response)?;
        if booked.resy_token.trim().is_empty() {
            return Err(ApiError::schema_mismatch(
                BOOK_ENDPOINT,
                &response.body,
                <serde_json::Error as serde::de::Error>::custom("empty resy_token"),
            ));
        }
        Ok(BookingOutcome::Confirmed(booked.resy_token))
    }
}

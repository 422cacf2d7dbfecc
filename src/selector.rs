// Nearest-time slot selection over a start-time sorted candidate list

use std::cmp::Ordering;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::{
    errors::{ApiError, Result},
    models::{ReservationRequest, Slot},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionCriteria {
    pub ideal: NaiveDateTime,
    pub window: Duration,
    pub prefer_early: bool,
    pub preferred_type: Option<String>,
}

impl SelectionCriteria {
    pub fn from_request(request: &ReservationRequest, today: NaiveDate) -> Result<Self> {
        Ok(Self {
            ideal: request.ideal_time(today)?,
            window: request.window(),
            prefer_early: request.prefer_early,
            preferred_type: request.preferred_type.clone(),
        })
    }

    fn type_matches(&self, slot: &Slot) -> bool {
        self.preferred_type
            .as_deref()
            .map_or(true, |wanted| slot.slot_type() == wanted)
    }

    fn distance(&self, slot: &Slot) -> Duration {
        let delta = slot.start() - self.ideal;
        if delta < Duration::zero() {
            -delta
        } else {
            delta
        }
    }
}

/// Walks outward from the ideal time, yielding acceptable slots nearest first.
///
/// Equidistant candidates on opposite sides come out earlier-first when
/// `prefer_early` is set, later-first otherwise. A side stops as soon as its
/// next candidate falls outside the window, since everything beyond it is
/// farther still.
pub struct SlotScan<'s, 'c> {
    slots: &'s [Slot],
    criteria: &'c SelectionCriteria,
    // next candidate below the ideal time, walking down
    left: Option<usize>,
    // next candidate at or above the ideal time, walking up
    right: usize,
}

impl<'s, 'c> SlotScan<'s, 'c> {
    pub fn new(slots: &'s [Slot], criteria: &'c SelectionCriteria) -> Self {
        debug_assert!(
            slots.windows(2).all(|w| w[0].start() <= w[1].start()),
            "slots must be sorted by start time"
        );
        let insertion = slots.partition_point(|slot| slot.start() < criteria.ideal);
        Self {
            slots,
            criteria,
            left: insertion.checked_sub(1),
            right: insertion,
        }
    }

    fn left_distance(&self) -> Option<Duration> {
        self.left
            .map(|i| self.criteria.distance(&self.slots[i]))
            .filter(|d| *d <= self.criteria.window)
    }

    fn right_distance(&self) -> Option<Duration> {
        self.slots
            .get(self.right)
            .map(|slot| self.criteria.distance(slot))
            .filter(|d| *d <= self.criteria.window)
    }

    fn take_left(&mut self) -> &'s Slot {
        let i = self.left.unwrap_or_default();
        self.left = i.checked_sub(1);
        &self.slots[i]
    }

    fn take_right(&mut self) -> &'s Slot {
        let slot = &self.slots[self.right];
        self.right += 1;
        slot
    }
}

impl<'s, 'c> Iterator for SlotScan<'s, 'c> {
    type Item = &'s Slot;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let candidate = match (self.left_distance(), self.right_distance()) {
                (None, None) => return None,
                (Some(_), None) => self.take_left(),
                (None, Some(_)) => self.take_right(),
                (Some(l), Some(r)) => match l.cmp(&r) {
                    Ordering::Less => self.take_left(),
                    Ordering::Greater => self.take_right(),
                    Ordering::Equal if self.criteria.prefer_early => self.take_left(),
                    Ordering::Equal => self.take_right(),
                },
            };
            if self.criteria.type_matches(candidate) {
                return Some(candidate);
            }
        }
    }
}

/// Picks the in-window, type-matching slot closest to the ideal time.
///
/// `slots` must be sorted ascending by start time. An exact match wins
/// immediately; otherwise the scan stops at the first acceptable candidate,
/// because every unexplored candidate is at least as far away.
pub fn select_slot<'a>(slots: &'a [Slot], criteria: &SelectionCriteria) -> Result<&'a Slot> {
    SlotScan::new(slots, criteria)
        .next()
        .ok_or(ApiError::NoAcceptableSlot)
}

/// Up to `n` acceptable slots, best first, in the same order `select_slot` uses.
pub fn rank_slots<'a>(slots: &'a [Slot], criteria: &SelectionCriteria, n: usize) -> Vec<&'a Slot> {
    SlotScan::new(slots, criteria).take(n).collect()
}

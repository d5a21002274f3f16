use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::types::{CorporateEvent, Trade};

pub const SYNTHETIC_EVENT_TYPES: &[&str] = &[
    "earnings",
    "merger_announcement",
    "acquisition",
    "guidance_revision",
    "dividend_change",
];

const SYNTHETIC_SPACING_DAYS: i64 = 7;

/// Fabricate one event per instrument per week of observed trading.
///
/// Used only when no corporate-event table exists. The events are not real
/// announcements, so every rule outcome built on them is a best-effort
/// approximation; callers must surface that.
pub struct EventSynthesizer {
    rng: StdRng,
}

impl EventSynthesizer {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Weekly announcement dates starting one week after each instrument's
    /// first trading day, through its last trading day.
    pub fn synthesize(&mut self, trades: &[Trade]) -> Vec<CorporateEvent> {
        let mut spans: BTreeMap<&str, (NaiveDate, NaiveDate)> = BTreeMap::new();
        for trade in trades {
            let day = trade.timestamp.date_naive();
            spans
                .entry(trade.instrument_id.as_str())
                .and_modify(|(first, last)| {
                    *first = (*first).min(day);
                    *last = (*last).max(day);
                })
                .or_insert((day, day));
        }

        let mut events = Vec::new();
        for (instrument, (first, last)) in spans {
            let mut day = first + Duration::days(SYNTHETIC_SPACING_DAYS);
            let mut seq = 0u32;
            while day <= last {
                seq += 1;
                let event_type = SYNTHETIC_EVENT_TYPES[self.rng.gen_range(0..SYNTHETIC_EVENT_TYPES.len())];
                let announcement_date = midnight_utc(day);
                events.push(CorporateEvent {
                    event_id: format!("SYN-{instrument}-{seq:04}"),
                    instrument_id: instrument.to_string(),
                    event_type: event_type.to_string(),
                    announcement_date,
                    event_date: Some(announcement_date + Duration::days(1)),
                });
                day += Duration::days(SYNTHETIC_SPACING_DAYS);
            }
        }

        debug!(events = events.len(), "synthesized placeholder events from trade history");
        events
    }
}

fn midnight_utc(day: NaiveDate) -> DateTime<Utc> {
    day.and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

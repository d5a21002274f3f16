use chrono::{DateTime, Utc};
use serde::Serialize;

// ── Source Types (loaded from the table store) ──

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub trade_id: String,
    pub timestamp: DateTime<Utc>,
    pub instrument_id: String,
    pub buy_account_id: String,
    pub sell_account_id: String,
    pub quantity: f64,
    pub price: f64,
    pub trade_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub account_id: String,
    pub beneficial_owner_id: Option<String>,
    pub firm_id: Option<String>,
    pub related_accounts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorporateEvent {
    pub event_id: String,
    pub instrument_id: String,
    pub event_type: String,
    pub announcement_date: DateTime<Utc>,
    pub event_date: Option<DateTime<Utc>>,
}

/// Where the corporate events of a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventSource {
    Loaded,
    /// Fabricated from trade history because no event table exists.
    Synthesized,
}

// ── Candidate Types (per-rule intermediate rows) ──

#[derive(Debug, Clone, Serialize)]
pub struct PreAnnouncementCandidate {
    pub event_id: String,
    pub instrument_id: String,
    pub account_id: String,
    pub announcement_date: DateTime<Utc>,
    pub trade_count: u64,
    pub pre_window_volume: f64,
    pub baseline_mean_daily_volume: f64,
    pub baseline_std_daily_volume: f64,
    pub volume_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkCandidate {
    pub event_id: String,
    pub instrument_id: String,
    pub account_id: String,
    pub announcement_date: DateTime<Utc>,
    pub related_active: Vec<String>,
    pub related_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfitCandidate {
    pub event_id: String,
    pub instrument_id: String,
    pub account_id: String,
    pub announcement_date: DateTime<Utc>,
    pub avg_buy_price: f64,
    pub post_avg_price: f64,
    pub return_pct: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeakageCandidate {
    pub event_id: String,
    pub instrument_id: String,
    pub announcement_date: DateTime<Utc>,
    pub account_count: u64,
    pub total_volume: f64,
    pub top_account: String,
}

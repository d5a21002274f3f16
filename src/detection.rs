//! The four insider-trading rules.
//!
//! Each rule windows every corporate event against the trade history of the
//! event's instrument, keeps the rows that cross its threshold as candidates,
//! then aggregates candidates into occurrence counts (distinct events). Groups
//! with fewer than `min_suspicious_events` occurrences never produce an alert.
//! Rules are independent of each other and only read their inputs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertEngine, AlertSeverity, RuleId, LEAKAGE_CONFIDENCE};
use crate::config::DetectorConfig;
use crate::types::*;

/// Post-announcement window used by the abnormal-profit rule.
pub const POST_ANNOUNCEMENT_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct RuleOutput<C> {
    pub rule_id: RuleId,
    pub alerts: Vec<Alert>,
    pub candidates: Vec<C>,
}

impl<C> RuleOutput<C> {
    fn empty(rule_id: RuleId) -> Self {
        Self { rule_id, alerts: Vec::new(), candidates: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty() && self.candidates.is_empty()
    }
}

// ── Trade windows ──

/// Trades grouped by instrument and sorted by time, for range lookups.
pub struct TradeIndex<'a> {
    by_instrument: HashMap<&'a str, Vec<&'a Trade>>,
}

impl<'a> TradeIndex<'a> {
    pub fn new(trades: &'a [Trade]) -> Self {
        let mut by_instrument: HashMap<&'a str, Vec<&'a Trade>> = HashMap::new();
        for trade in trades {
            by_instrument.entry(trade.instrument_id.as_str()).or_default().push(trade);
        }
        for rows in by_instrument.values_mut() {
            rows.sort_by_key(|t| t.timestamp);
        }
        Self { by_instrument }
    }

    /// Trades for `instrument` with `start <= timestamp < end`.
    pub fn window(&self, instrument: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> &[&'a Trade] {
        self.slice(instrument, |t| t.timestamp < start, |t| t.timestamp < end)
    }

    /// Trades for `instrument` with `start <= timestamp <= end`.
    pub fn window_inclusive(&self, instrument: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> &[&'a Trade] {
        self.slice(instrument, |t| t.timestamp < start, |t| t.timestamp <= end)
    }

    fn slice(
        &self,
        instrument: &str,
        before_start: impl Fn(&Trade) -> bool,
        before_end: impl Fn(&Trade) -> bool,
    ) -> &[&'a Trade] {
        let Some(rows) = self.by_instrument.get(instrument) else {
            return &[];
        };
        let lo = rows.partition_point(|t| before_start(*t));
        let hi = rows.partition_point(|t| before_end(*t));
        if hi <= lo {
            return &[];
        }
        &rows[lo..hi]
    }
}

#[derive(Debug, Default)]
struct BuyActivity {
    quantity: f64,
    price_sum: f64,
    trades: u64,
}

impl BuyActivity {
    fn avg_price(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.price_sum / self.trades as f64
        }
    }
}

/// Per buying account, in account-id order.
fn buy_activity<'a>(rows: &[&'a Trade]) -> BTreeMap<&'a str, BuyActivity> {
    let mut by_account: BTreeMap<&'a str, BuyActivity> = BTreeMap::new();
    for trade in rows {
        if trade.buy_account_id.is_empty() {
            continue;
        }
        let activity = by_account.entry(trade.buy_account_id.as_str()).or_default();
        activity.quantity += trade.quantity;
        activity.price_sum += trade.price;
        activity.trades += 1;
    }
    by_account
}

// ── Volume baseline ──

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VolumeBaseline {
    pub mean_daily_volume: f64,
    /// Sample standard deviation; zero with fewer than two trading days.
    pub std_daily_volume: f64,
    pub trading_days: usize,
}

/// Mean and spread of each instrument's total daily quantity over the whole
/// trade history. Only days with at least one trade count.
pub fn daily_volume_baselines(trades: &[Trade]) -> HashMap<String, VolumeBaseline> {
    let mut daily: BTreeMap<(&str, NaiveDate), f64> = BTreeMap::new();
    for trade in trades {
        *daily
            .entry((trade.instrument_id.as_str(), trade.timestamp.date_naive()))
            .or_insert(0.0) += trade.quantity;
    }

    let mut per_instrument: HashMap<&str, Vec<f64>> = HashMap::new();
    for ((instrument, _), volume) in daily {
        per_instrument.entry(instrument).or_default().push(volume);
    }

    per_instrument
        .into_iter()
        .map(|(instrument, volumes)| {
            let n = volumes.len();
            let mean = volumes.iter().sum::<f64>() / n as f64;
            let std = if n > 1 {
                (volumes.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
            } else {
                0.0
            };
            (
                instrument.to_string(),
                VolumeBaseline { mean_daily_volume: mean, std_daily_volume: std, trading_days: n },
            )
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn max(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// A configured window as a `Duration`, or `None` (logged) when it does not fit.
fn window_length(
    rule_id: RuleId,
    setting: &str,
    value: i64,
    to_duration: fn(i64) -> Option<Duration>,
) -> Option<Duration> {
    let window = to_duration(value);
    if window.is_none() {
        warn!(rule = rule_id.code(), setting, value, "window out of range; rule skipped");
    }
    window
}

// ── Rule 5.1: pre-announcement trading ──

#[derive(Default)]
struct VolumeGroup {
    events: BTreeSet<String>,
    ratios: Vec<f64>,
    volume: f64,
}

pub fn pre_announcement_trading(
    trades: &[Trade],
    events: &[CorporateEvent],
    config: &DetectorConfig,
    engine: &AlertEngine,
) -> RuleOutput<PreAnnouncementCandidate> {
    let rule_id = RuleId::PreAnnouncementTrading;
    if trades.is_empty() || events.is_empty() {
        return RuleOutput::empty(rule_id);
    }

    let Some(window) = window_length(
        rule_id,
        "pre_announcement_window_days",
        config.pre_announcement_window_days,
        Duration::try_days,
    ) else {
        return RuleOutput::empty(rule_id);
    };
    let index = TradeIndex::new(trades);
    let baselines = daily_volume_baselines(trades);

    let mut candidates = Vec::new();
    for event in events {
        let Some(start) = event.announcement_date.checked_sub_signed(window) else {
            debug!(event = %event.event_id, "pre-announcement window starts out of range");
            continue;
        };
        let rows = index.window(&event.instrument_id, start, event.announcement_date);
        if rows.is_empty() {
            continue;
        }
        let baseline = baselines.get(&event.instrument_id).copied().unwrap_or_default();

        for (account, activity) in buy_activity(rows) {
            let volume_ratio = activity.quantity / (baseline.mean_daily_volume + 1.0);
            if volume_ratio >= config.abnormal_volume_multiplier {
                candidates.push(PreAnnouncementCandidate {
                    event_id: event.event_id.clone(),
                    instrument_id: event.instrument_id.clone(),
                    account_id: account.to_string(),
                    announcement_date: event.announcement_date,
                    trade_count: activity.trades,
                    pre_window_volume: activity.quantity,
                    baseline_mean_daily_volume: baseline.mean_daily_volume,
                    baseline_std_daily_volume: baseline.std_daily_volume,
                    volume_ratio,
                });
            }
        }
    }

    let mut groups: BTreeMap<(&str, &str), VolumeGroup> = BTreeMap::new();
    for c in &candidates {
        let group = groups.entry((c.account_id.as_str(), c.instrument_id.as_str())).or_default();
        group.events.insert(c.event_id.clone());
        group.ratios.push(c.volume_ratio);
        group.volume += c.pre_window_volume;
    }

    let alerts: Vec<Alert> = groups
        .into_iter()
        .filter(|(_, g)| g.events.len() >= config.min_suspicious_events)
        .map(|((account, instrument), g)| {
            let n = g.events.len();
            let mut evidence = Map::new();
            evidence.insert("avg_volume_ratio".into(), json!(mean(&g.ratios)));
            evidence.insert("max_volume_ratio".into(), json!(max(&g.ratios)));
            evidence.insert("total_pre_window_volume".into(), json!(g.volume));
            evidence.insert("event_ids".into(), json!(g.events));
            engine.raise(
                rule_id,
                n,
                vec![account.to_string()],
                vec![instrument.to_string()],
                format!(
                    "Account {account} bought {instrument} at abnormal volume ahead of {n} corporate announcements"
                ),
                evidence,
            )
        })
        .collect();

    debug!(rule = rule_id.code(), candidates = candidates.len(), alerts = alerts.len(), "evaluated");
    RuleOutput { rule_id, alerts, candidates }
}

// ── Rule 5.2: insider network trading ──

#[derive(Default)]
struct NetworkGroup {
    events: BTreeSet<String>,
    related_counts: Vec<f64>,
    instruments: BTreeSet<String>,
    related: BTreeSet<String>,
}

pub fn network_trading(
    trades: &[Trade],
    accounts: &[Account],
    events: &[CorporateEvent],
    config: &DetectorConfig,
    engine: &AlertEngine,
) -> RuleOutput<NetworkCandidate> {
    let rule_id = RuleId::NetworkTrading;

    let related: HashMap<&str, &[String]> = accounts
        .iter()
        .filter(|a| !a.related_accounts.is_empty())
        .map(|a| (a.account_id.as_str(), a.related_accounts.as_slice()))
        .collect();
    if related.is_empty() {
        info!(rule = rule_id.code(), "no related-account data; network rule has nothing to evaluate");
        return RuleOutput::empty(rule_id);
    }
    if trades.is_empty() || events.is_empty() {
        return RuleOutput::empty(rule_id);
    }

    let Some(window) =
        window_length(rule_id, "network_time_window_days", config.network_time_window_days, Duration::try_days)
    else {
        return RuleOutput::empty(rule_id);
    };
    let index = TradeIndex::new(trades);

    let mut candidates = Vec::new();
    for event in events {
        let Some(start) = event.announcement_date.checked_sub_signed(window) else {
            debug!(event = %event.event_id, "network window starts out of range");
            continue;
        };
        let rows = index.window(&event.instrument_id, start, event.announcement_date);
        let active: BTreeSet<&str> = rows
            .iter()
            .map(|t| t.buy_account_id.as_str())
            .filter(|a| !a.is_empty())
            .collect();
        if active.len() < 2 {
            continue;
        }

        for &account in &active {
            let Some(relations) = related.get(account) else {
                continue;
            };
            let related_active: Vec<String> = relations
                .iter()
                .filter(|r| r.as_str() != account && active.contains(r.as_str()))
                .cloned()
                .collect();
            if related_active.is_empty() {
                continue;
            }
            candidates.push(NetworkCandidate {
                event_id: event.event_id.clone(),
                instrument_id: event.instrument_id.clone(),
                account_id: account.to_string(),
                announcement_date: event.announcement_date,
                related_count: related_active.len() as u64,
                related_active,
            });
        }
    }

    let mut groups: BTreeMap<&str, NetworkGroup> = BTreeMap::new();
    for c in &candidates {
        let group = groups.entry(c.account_id.as_str()).or_default();
        group.events.insert(c.event_id.clone());
        group.related_counts.push(c.related_count as f64);
        group.instruments.insert(c.instrument_id.clone());
        group.related.extend(c.related_active.iter().cloned());
    }

    let alerts: Vec<Alert> = groups
        .into_iter()
        .filter(|(_, g)| g.events.len() >= config.min_suspicious_events)
        .map(|(account, g)| {
            let n = g.events.len();
            let mut account_ids = vec![account.to_string()];
            account_ids.extend(g.related.iter().cloned());

            let mut evidence = Map::new();
            evidence.insert("avg_related_accounts".into(), json!(mean(&g.related_counts)));
            evidence.insert("num_instruments".into(), json!(g.instruments.len()));
            evidence.insert("related_accounts".into(), json!(g.related));
            engine.raise(
                rule_id,
                n,
                account_ids,
                g.instruments.into_iter().collect(),
                format!("Account {account} traded alongside related accounts ahead of {n} corporate announcements"),
                evidence,
            )
        })
        .collect();

    debug!(rule = rule_id.code(), candidates = candidates.len(), alerts = alerts.len(), "evaluated");
    RuleOutput { rule_id, alerts, candidates }
}

// ── Rule 5.3: abnormal profit patterns ──

#[derive(Default)]
struct ProfitGroup {
    events: BTreeSet<String>,
    returns: Vec<f64>,
    quantity: f64,
    instruments: BTreeSet<String>,
}

pub fn abnormal_profits(
    trades: &[Trade],
    events: &[CorporateEvent],
    config: &DetectorConfig,
    engine: &AlertEngine,
) -> RuleOutput<ProfitCandidate> {
    let rule_id = RuleId::AbnormalProfit;
    if trades.is_empty() || events.is_empty() {
        return RuleOutput::empty(rule_id);
    }

    let Some(pre) = window_length(
        rule_id,
        "pre_announcement_window_days",
        config.pre_announcement_window_days,
        Duration::try_days,
    ) else {
        return RuleOutput::empty(rule_id);
    };
    let post = Duration::days(POST_ANNOUNCEMENT_DAYS);
    let index = TradeIndex::new(trades);

    let mut candidates = Vec::new();
    for event in events {
        let ann = event.announcement_date;
        let (Some(pre_start), Some(post_end)) = (ann.checked_sub_signed(pre), ann.checked_add_signed(post)) else {
            debug!(event = %event.event_id, "profit windows out of range");
            continue;
        };
        let pre_rows = index.window(&event.instrument_id, pre_start, ann);
        let post_rows = index.window_inclusive(&event.instrument_id, ann, post_end);
        if pre_rows.is_empty() || post_rows.is_empty() {
            continue;
        }
        let post_avg_price = post_rows.iter().map(|t| t.price).sum::<f64>() / post_rows.len() as f64;

        for (account, activity) in buy_activity(pre_rows) {
            let avg_buy_price = activity.avg_price();
            if avg_buy_price <= 0.0 {
                continue;
            }
            let return_pct = (post_avg_price - avg_buy_price) / avg_buy_price;
            if return_pct >= config.profit_threshold_pct {
                candidates.push(ProfitCandidate {
                    event_id: event.event_id.clone(),
                    instrument_id: event.instrument_id.clone(),
                    account_id: account.to_string(),
                    announcement_date: ann,
                    avg_buy_price,
                    post_avg_price,
                    return_pct,
                    quantity: activity.quantity,
                });
            }
        }
    }

    let mut groups: BTreeMap<&str, ProfitGroup> = BTreeMap::new();
    for c in &candidates {
        let group = groups.entry(c.account_id.as_str()).or_default();
        group.events.insert(c.event_id.clone());
        group.returns.push(c.return_pct);
        group.quantity += c.quantity;
        group.instruments.insert(c.instrument_id.clone());
    }

    let alerts: Vec<Alert> = groups
        .into_iter()
        .filter(|(_, g)| g.events.len() >= config.min_suspicious_events)
        .map(|(account, g)| {
            let n = g.events.len();
            let mut evidence = Map::new();
            evidence.insert("avg_return_pct".into(), json!(mean(&g.returns)));
            evidence.insert("max_return_pct".into(), json!(max(&g.returns)));
            evidence.insert("total_quantity".into(), json!(g.quantity));
            evidence.insert("num_instruments".into(), json!(g.instruments.len()));
            engine.raise(
                rule_id,
                n,
                vec![account.to_string()],
                g.instruments.into_iter().collect(),
                format!(
                    "Account {account} bought ahead of {n} announcements and gained {:.1}% on average",
                    mean(&g.returns) * 100.0
                ),
                evidence,
            )
        })
        .collect();

    debug!(rule = rule_id.code(), candidates = candidates.len(), alerts = alerts.len(), "evaluated");
    RuleOutput { rule_id, alerts, candidates }
}

// ── Rule 5.4: information leakage ──

#[derive(Default)]
struct LeakageGroup {
    events: BTreeSet<String>,
    account_counts: Vec<f64>,
    volume: f64,
    top_accounts: BTreeSet<String>,
}

/// Same thresholds as [`AlertEngine::severity`], applied to instrument-level
/// groups.
fn leakage_severity(occurrences: usize, config: &DetectorConfig) -> AlertSeverity {
    if occurrences >= config.severity_high_occurrences {
        AlertSeverity::High
    } else if occurrences >= config.severity_medium_occurrences {
        AlertSeverity::Medium
    } else {
        AlertSeverity::Low
    }
}

pub fn information_leakage(
    trades: &[Trade],
    events: &[CorporateEvent],
    config: &DetectorConfig,
    engine: &AlertEngine,
) -> RuleOutput<LeakageCandidate> {
    let rule_id = RuleId::InformationLeakage;
    if trades.is_empty() || events.is_empty() {
        return RuleOutput::empty(rule_id);
    }

    let Some(window) = window_length(
        rule_id,
        "leakage_cluster_window_hours",
        config.leakage_cluster_window_hours,
        Duration::try_hours,
    ) else {
        return RuleOutput::empty(rule_id);
    };
    let index = TradeIndex::new(trades);

    let mut candidates = Vec::new();
    for event in events {
        let Some(start) = event.announcement_date.checked_sub_signed(window) else {
            debug!(event = %event.event_id, "leakage window starts out of range");
            continue;
        };
        let rows = index.window(&event.instrument_id, start, event.announcement_date);
        let buyers = buy_activity(rows);
        if buyers.len() < config.leakage_min_accounts {
            continue;
        }

        // ties go to the lowest account id
        let mut top: Option<(&str, f64)> = None;
        for (account, activity) in &buyers {
            if top.map_or(true, |(_, q)| activity.quantity > q) {
                top = Some((*account, activity.quantity));
            }
        }

        candidates.push(LeakageCandidate {
            event_id: event.event_id.clone(),
            instrument_id: event.instrument_id.clone(),
            announcement_date: event.announcement_date,
            account_count: buyers.len() as u64,
            total_volume: rows.iter().map(|t| t.quantity).sum(),
            top_account: top.map(|(a, _)| a.to_string()).unwrap_or_default(),
        });
    }

    let mut groups: BTreeMap<&str, LeakageGroup> = BTreeMap::new();
    for c in &candidates {
        let group = groups.entry(c.instrument_id.as_str()).or_default();
        group.events.insert(c.event_id.clone());
        group.account_counts.push(c.account_count as f64);
        group.volume += c.total_volume;
        group.top_accounts.insert(c.top_account.clone());
    }

    let alerts: Vec<Alert> = groups
        .into_iter()
        .filter(|(_, g)| g.events.len() >= config.min_suspicious_events)
        .map(|(instrument, g)| {
            let n = g.events.len();
            let severity = leakage_severity(n, config);
            let confidence = LEAKAGE_CONFIDENCE.score(n);

            let mut evidence = Map::new();
            evidence.insert("avg_accounts_per_cluster".into(), json!(mean(&g.account_counts)));
            evidence.insert("total_volume".into(), json!(g.volume));
            evidence.insert("top_accounts".into(), Value::from(g.top_accounts.into_iter().collect::<Vec<_>>()));
            engine.raise_scored(
                rule_id,
                severity,
                confidence,
                n,
                Vec::new(),
                vec![instrument.to_string()],
                format!("Clustered buying in {instrument} shortly before {n} corporate announcements"),
                evidence,
            )
        })
        .collect();

    debug!(rule = rule_id.code(), candidates = candidates.len(), alerts = alerts.len(), "evaluated");
    RuleOutput { rule_id, alerts, candidates }
}

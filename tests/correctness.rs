//! Correctness tests for the four insider-trading rules, the scoring model
//! and the end-to-end detector.
//!
//! Fixtures are built by hand with known volumes, prices and windows, and the
//! assertions check exact candidate and alert outputs.

use std::sync::Arc;

use arrow::array::{AsArray, Float64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow_array::RecordBatch;
use chrono::{DateTime, Duration, TimeZone, Utc};

use insider_surveillance::alerts::{alerts_from_batch, AlertEngine, AlertSeverity, RuleId};
use insider_surveillance::detection::{self, daily_volume_baselines};
use insider_surveillance::surveillance::{
    intermediate_table_name, ALERTS_CATEGORY, ALERTS_KIND, ALERTS_TABLE, INTERMEDIATE_CATEGORY, INTERMEDIATE_KIND,
    SUMMARY_TABLE,
};
use insider_surveillance::types::*;
use insider_surveillance::{DetectError, DetectorConfig, DirStore, InsiderTradingDetector, MemoryStore, TableStore};

// ── Fixture helpers ──

fn day(d: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(d)
}

fn run_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn trade(id: &str, instrument: &str, buyer: &str, quantity: f64, price: f64, ts: DateTime<Utc>) -> Trade {
    Trade {
        trade_id: id.into(),
        timestamp: ts,
        instrument_id: instrument.into(),
        buy_account_id: buyer.into(),
        sell_account_id: "MM-1".into(),
        quantity,
        price,
        trade_value: quantity * price,
    }
}

fn event(id: &str, instrument: &str, announced: DateTime<Utc>) -> CorporateEvent {
    CorporateEvent {
        event_id: id.into(),
        instrument_id: instrument.into(),
        event_type: "earnings".into(),
        announcement_date: announced,
        event_date: None,
    }
}

fn account(id: &str, related: &[&str]) -> Account {
    Account {
        account_id: id.into(),
        beneficial_owner_id: Some(format!("BO-{id}")),
        firm_id: Some("FIRM-1".into()),
        related_accounts: related.iter().map(|s| s.to_string()).collect(),
    }
}

/// One trade per day at `daily` volume, each bought by a different account so
/// no background buyer stands out in any window.
fn background(instrument: &str, days: i64, daily: f64, price: f64) -> Vec<Trade> {
    (0..days)
        .map(|d| {
            trade(
                &format!("BG-{instrument}-{d}"),
                instrument,
                &format!("BG-{d:03}"),
                daily,
                price,
                day(d) + Duration::hours(10),
            )
        })
        .collect()
}

fn engine(config: &DetectorConfig) -> AlertEngine {
    AlertEngine::new(config, run_time())
}

fn trades_batch(trades: &[Trade]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("trade_id", DataType::Utf8, false),
        Field::new("timestamp", DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())), false),
        Field::new("instrument_id", DataType::Utf8, false),
        Field::new("buy_account_id", DataType::Utf8, false),
        Field::new("sell_account_id", DataType::Utf8, false),
        Field::new("quantity", DataType::Float64, false),
        Field::new("price", DataType::Float64, false),
        Field::new("trade_value", DataType::Float64, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from_iter_values(trades.iter().map(|t| t.trade_id.as_str()))),
            Arc::new(
                TimestampMillisecondArray::from(trades.iter().map(|t| t.timestamp.timestamp_millis()).collect::<Vec<_>>())
                    .with_timezone("UTC"),
            ),
            Arc::new(StringArray::from_iter_values(trades.iter().map(|t| t.instrument_id.as_str()))),
            Arc::new(StringArray::from_iter_values(trades.iter().map(|t| t.buy_account_id.as_str()))),
            Arc::new(StringArray::from_iter_values(trades.iter().map(|t| t.sell_account_id.as_str()))),
            Arc::new(Float64Array::from(trades.iter().map(|t| t.quantity).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(trades.iter().map(|t| t.price).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(trades.iter().map(|t| t.trade_value).collect::<Vec<_>>())),
        ],
    )
    .unwrap()
}

fn accounts_batch(accounts: &[Account]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("account_id", DataType::Utf8, false),
        Field::new("beneficial_owner_id", DataType::Utf8, true),
        Field::new("firm_id", DataType::Utf8, true),
        Field::new("related_accounts", DataType::Utf8, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from_iter_values(accounts.iter().map(|a| a.account_id.as_str()))),
            Arc::new(StringArray::from(accounts.iter().map(|a| a.beneficial_owner_id.clone()).collect::<Vec<_>>())),
            Arc::new(StringArray::from(accounts.iter().map(|a| a.firm_id.clone()).collect::<Vec<_>>())),
            Arc::new(StringArray::from_iter_values(
                accounts.iter().map(|a| serde_json::to_string(&a.related_accounts).unwrap()),
            )),
        ],
    )
    .unwrap()
}

/// Announcement dates stored as ISO-8601 strings, as CSV exports carry them.
fn events_batch(events: &[CorporateEvent]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("event_id", DataType::Utf8, false),
        Field::new("instrument_id", DataType::Utf8, false),
        Field::new("event_type", DataType::Utf8, false),
        Field::new("announcement_date", DataType::Utf8, true),
        Field::new("event_date", DataType::Utf8, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from_iter_values(events.iter().map(|e| e.event_id.as_str()))),
            Arc::new(StringArray::from_iter_values(events.iter().map(|e| e.instrument_id.as_str()))),
            Arc::new(StringArray::from_iter_values(events.iter().map(|e| e.event_type.as_str()))),
            Arc::new(StringArray::from_iter_values(events.iter().map(|e| e.announcement_date.to_rfc3339()))),
            Arc::new(StringArray::from(
                events.iter().map(|e| e.event_date.map(|d| d.to_rfc3339())).collect::<Vec<_>>(),
            )),
        ],
    )
    .unwrap()
}

/// Instrument I100: 30 quiet days at 100/day, and account ACC1 buying
/// 3 x 500 two days before each of E1 (day 10) and E2 (day 20).
fn scenario_i100() -> (Vec<Trade>, Vec<CorporateEvent>) {
    let mut trades = background("I100", 30, 100.0, 50.0);
    let events = vec![event("E1", "I100", day(10)), event("E2", "I100", day(20))];
    for e in &events {
        for n in 0..3 {
            trades.push(trade(
                &format!("ACC1-{}-{n}", e.event_id),
                "I100",
                "ACC1",
                500.0,
                50.0,
                e.announcement_date - Duration::days(2) + Duration::minutes(n),
            ));
        }
    }
    (trades, events)
}

/// Instrument I1 with 1000/day background for 60 days; account X buys
/// `k` times the daily volume two days before E1 (day 20) and E2 (day 40).
fn spike_fixture(k: f64) -> (Vec<Trade>, Vec<CorporateEvent>) {
    let base = 1000.0;
    let mut trades = background("I1", 60, base, 10.0);
    let events = vec![event("E1", "I1", day(20)), event("E2", "I1", day(40))];
    for e in &events {
        trades.push(trade(
            &format!("X-{}", e.event_id),
            "I1",
            "X",
            k * base,
            10.0,
            e.announcement_date - Duration::days(2),
        ));
    }
    (trades, events)
}

// ── Test 1: Empty inputs ──
// Every rule returns no alerts and no candidates when trades or events are empty.
#[test]
fn test_empty_inputs_yield_nothing() {
    let config = DetectorConfig::default();
    let engine = engine(&config);
    let (trades, events) = scenario_i100();
    let accounts = vec![account("ACC1", &["ACC2"])];
    let no_trades: &[Trade] = &[];
    let no_events: &[CorporateEvent] = &[];

    for (t, e) in [(no_trades, &events[..]), (&trades[..], no_events)] {
        assert!(detection::pre_announcement_trading(t, e, &config, &engine).is_empty());
        assert!(detection::network_trading(t, &accounts, e, &config, &engine).is_empty());
        assert!(detection::abnormal_profits(t, e, &config, &engine).is_empty());
        assert!(detection::information_leakage(t, e, &config, &engine).is_empty());
    }
}

// ── Test 2: Rule 5.1 pre-announcement scenario ──
// 3 x 500 two days before each announcement against a ~100/day baseline.
#[test]
fn test_pre_announcement_scenario() {
    let config = DetectorConfig::default();
    let (trades, events) = scenario_i100();
    let out = detection::pre_announcement_trading(&trades, &events, &config, &engine(&config));

    let acc1: Vec<_> = out.candidates.iter().filter(|c| c.account_id == "ACC1").collect();
    assert_eq!(acc1.len(), 2, "ACC1 should be flagged once per event");
    for c in &acc1 {
        assert_eq!(c.pre_window_volume, 1500.0);
        assert_eq!(c.trade_count, 3);
        let expected = 1500.0 / (c.baseline_mean_daily_volume + 1.0);
        assert!((c.volume_ratio - expected).abs() < 1e-9);
        assert!(c.volume_ratio >= config.abnormal_volume_multiplier, "ratio {} too low", c.volume_ratio);
    }
    assert!(
        out.candidates.iter().all(|c| c.account_id == "ACC1"),
        "background buyers must never cross the multiplier"
    );

    assert_eq!(out.alerts.len(), 1, "one alert per (account, instrument)");
    let alert = &out.alerts[0];
    assert_eq!(alert.rule_id, RuleId::PreAnnouncementTrading);
    assert_eq!(alert.account_ids, vec!["ACC1".to_string()]);
    assert_eq!(alert.instrument_ids, vec!["I100".to_string()]);
    assert_eq!(alert.num_events(), Some(2));
    assert_eq!(alert.severity, AlertSeverity::Low);
    assert!((alert.confidence_score - 0.8).abs() < 1e-9);
    assert_eq!(alert.timestamp, run_time(), "alert time is generation time, not event time");
}

// ── Test 3: Rule 5.1 multiplier threshold ──
// k x baseline is flagged only when k / (1 + 1/B) clears the multiplier.
#[test]
fn test_pre_announcement_multiplier_threshold() {
    let config = DetectorConfig::default();
    for (k, expect_alert) in [(1.0, false), (2.0, false), (5.0, true), (8.0, true)] {
        let (trades, events) = spike_fixture(k);
        let out = detection::pre_announcement_trading(&trades, &events, &config, &engine(&config));

        let baseline = daily_volume_baselines(&trades)["I1"];
        let ratio = k * 1000.0 / (baseline.mean_daily_volume + 1.0);
        assert_eq!(ratio >= config.abnormal_volume_multiplier, expect_alert, "fixture for k={k} is miscalibrated");

        let x_alerts = out.alerts.iter().filter(|a| a.account_ids == vec!["X".to_string()]).count();
        assert_eq!(x_alerts, usize::from(expect_alert), "k={k}: ratio={ratio:.3}");
    }
}

// ── Test 4: min_suspicious_events gate ──
// A single qualifying event never alerts under the default minimum of 2.
#[test]
fn test_min_suspicious_events_gate() {
    let (trades, mut events) = spike_fixture(6.0);
    events.truncate(1);

    let config = DetectorConfig::default();
    let out = detection::pre_announcement_trading(&trades, &events, &config, &engine(&config));
    assert_eq!(out.candidates.iter().filter(|c| c.account_id == "X").count(), 1);
    assert!(out.alerts.is_empty(), "1 event < min_suspicious_events=2");

    let config = DetectorConfig { min_suspicious_events: 1, ..Default::default() };
    let out = detection::pre_announcement_trading(&trades, &events, &config, &engine(&config));
    assert_eq!(out.alerts.len(), 1);
    assert_eq!(out.alerts[0].num_events(), Some(1));
}

// ── Test 5: Severity at thresholds ──
// Exactly severity_high_occurrences events yields "high" and a capped confidence.
#[test]
fn test_severity_boundaries_through_rule() {
    let config = DetectorConfig::default();
    let mut trades = background("I1", 120, 1000.0, 10.0);
    let events: Vec<_> = (1..=5).map(|i| event(&format!("E{i}"), "I1", day(i * 20))).collect();
    for e in &events {
        trades.push(trade(&format!("X-{}", e.event_id), "I1", "X", 8000.0, 10.0, e.announcement_date - Duration::days(1)));
    }

    let sub = |n: usize| {
        let out = detection::pre_announcement_trading(&trades, &events[..n], &config, &engine(&config));
        out.alerts.into_iter().find(|a| a.account_ids == vec!["X".to_string()])
    };

    assert!(sub(1).is_none());
    let two = sub(2).expect("2 events should alert");
    let three = sub(3).expect("3 events should alert");
    let five = sub(5).expect("5 events should alert");
    assert_eq!(two.severity, AlertSeverity::Low);
    assert_eq!(three.severity, AlertSeverity::Medium);
    assert_eq!(sub(4).unwrap().severity, AlertSeverity::Medium);
    assert_eq!(five.severity, AlertSeverity::High);
    assert!(two.confidence_score <= three.confidence_score);
    assert!(three.confidence_score <= five.confidence_score);
    assert!((five.confidence_score - 0.95).abs() < 1e-9, "0.6 + 0.5 is capped at 0.95");
}

// ── Test 6: Rule 5.2 network trading ──
// N1 lists N2 as related; both buy I2 before two announcements. Only the
// account that lists the relation is the primary.
#[test]
fn test_network_trading() {
    let config = DetectorConfig::default();
    let accounts = vec![account("N1", &["N2", "N9"]), account("N2", &[]), account("N3", &[])];
    let events = vec![event("E1", "I2", day(10)), event("E2", "I2", day(20)), event("E3", "I2", day(30))];

    let mut trades = Vec::new();
    for e in &events[..2] {
        let t = e.announcement_date - Duration::days(1);
        trades.push(trade(&format!("{}-1", e.event_id), "I2", "N1", 10.0, 5.0, t));
        trades.push(trade(&format!("{}-2", e.event_id), "I2", "N2", 10.0, 5.0, t));
        trades.push(trade(&format!("{}-3", e.event_id), "I2", "N3", 10.0, 5.0, t));
    }
    // E3: N1 trades but N2 only after the announcement
    trades.push(trade("E3-1", "I2", "N1", 10.0, 5.0, day(29)));
    trades.push(trade("E3-2", "I2", "N2", 10.0, 5.0, day(30) + Duration::hours(1)));

    let out = detection::network_trading(&trades, &accounts, &events, &config, &engine(&config));
    assert_eq!(out.candidates.len(), 2, "E1 and E2 only; N9 never trades");
    assert!(out.candidates.iter().all(|c| c.account_id == "N1" && c.related_active == vec!["N2".to_string()]));

    assert_eq!(out.alerts.len(), 1);
    let alert = &out.alerts[0];
    assert_eq!(alert.rule_id, RuleId::NetworkTrading);
    assert_eq!(alert.account_ids, vec!["N1".to_string(), "N2".to_string()]);
    assert_eq!(alert.instrument_ids, vec!["I2".to_string()]);
    assert_eq!(alert.num_events(), Some(2));
    assert_eq!(alert.evidence["avg_related_accounts"].as_f64(), Some(1.0));
}

// ── Test 7: Rule 5.2 without relationship data ──
#[test]
fn test_network_without_relations_is_noop() {
    let config = DetectorConfig::default();
    let (trades, events) = scenario_i100();
    let accounts = vec![account("ACC1", &[]), account("BG-001", &[])];
    let out = detection::network_trading(&trades, &accounts, &events, &config, &engine(&config));
    assert!(out.is_empty());
}

// ── Test 8: Rule 5.3 abnormal profits ──
// P1 buys at 10 before each announcement and the post window trades at 12
// (+20%). P2 buys at 11.5 (+4.3%), below the 10% threshold.
#[test]
fn test_abnormal_profits() {
    let config = DetectorConfig::default();
    let events = vec![event("E1", "I3", day(10)), event("E2", "I4", day(20)), event("E3", "I3", day(40))];

    let mut trades = Vec::new();
    for e in &events[..2] {
        let ann = e.announcement_date;
        let inst = e.instrument_id.as_str();
        trades.push(trade(&format!("{}-p1", e.event_id), inst, "P1", 100.0, 10.0, ann - Duration::days(3)));
        trades.push(trade(&format!("{}-p1b", e.event_id), inst, "P1", 50.0, 10.0, ann - Duration::days(2)));
        trades.push(trade(&format!("{}-p2", e.event_id), inst, "P2", 100.0, 11.5, ann - Duration::days(1)));
        trades.push(trade(&format!("{}-post1", e.event_id), inst, "Q1", 10.0, 11.0, ann + Duration::days(1)));
        trades.push(trade(&format!("{}-post2", e.event_id), inst, "Q2", 10.0, 13.0, ann + Duration::days(7)));
    }
    // E3 has pre-window buying but no post-window trades at all
    trades.push(trade("E3-p1", "I3", "P1", 100.0, 1.0, day(39)));

    let out = detection::abnormal_profits(&trades, &events, &config, &engine(&config));

    let p1: Vec<_> = out.candidates.iter().filter(|c| c.account_id == "P1").collect();
    assert_eq!(p1.len(), 2, "E3 needs a non-empty post window");
    for c in &p1 {
        assert!((c.avg_buy_price - 10.0).abs() < 1e-9);
        assert!((c.post_avg_price - 12.0).abs() < 1e-9, "day+7 is inside the closed post window");
        assert!((c.return_pct - 0.2).abs() < 1e-9);
        assert_eq!(c.quantity, 150.0);
    }
    assert!(out.candidates.iter().all(|c| c.account_id != "P2"));

    assert_eq!(out.alerts.len(), 1);
    let alert = &out.alerts[0];
    assert_eq!(alert.account_ids, vec!["P1".to_string()]);
    assert_eq!(alert.instrument_ids, vec!["I3".to_string(), "I4".to_string()]);
    assert_eq!(alert.evidence["num_instruments"].as_u64(), Some(2));
    assert_eq!(alert.evidence["total_quantity"].as_f64(), Some(300.0));
}

// ── Test 9: Rule 5.4 aggregates by instrument ──
// Different accounts cluster before E1 and E2 on the same instrument: one
// instrument-level alert, not one per account.
#[test]
fn test_information_leakage_by_instrument() {
    let config = DetectorConfig::default();
    let events = vec![event("E1", "I5", day(10)), event("E2", "I5", day(20)), event("E3", "I5", day(30))];

    let mut trades = Vec::new();
    for (e, buyers) in events.iter().zip([["L1", "L2", "L3"], ["L4", "L5", "L6"]]) {
        for (n, buyer) in buyers.iter().enumerate() {
            let qty = 100.0 * (n as f64 + 1.0);
            trades.push(trade(&format!("{}-{buyer}", e.event_id), "I5", buyer, qty, 20.0, e.announcement_date - Duration::hours(6)));
        }
    }
    // E3: only two distinct buyers inside 48h, a third one outside it
    trades.push(trade("E3-a", "I5", "L7", 10.0, 20.0, day(30) - Duration::hours(3)));
    trades.push(trade("E3-b", "I5", "L8", 10.0, 20.0, day(30) - Duration::hours(2)));
    trades.push(trade("E3-c", "I5", "L9", 10.0, 20.0, day(30) - Duration::hours(49)));

    let out = detection::information_leakage(&trades, &events, &config, &engine(&config));
    assert_eq!(out.candidates.len(), 2);
    assert_eq!(out.candidates[0].account_count, 3);
    assert_eq!(out.candidates[0].total_volume, 600.0);
    assert_eq!(out.candidates[0].top_account, "L3");
    assert_eq!(out.candidates[1].top_account, "L6");

    assert_eq!(out.alerts.len(), 1, "clusters on one instrument collapse into one alert");
    let alert = &out.alerts[0];
    assert_eq!(alert.rule_id, RuleId::InformationLeakage);
    assert!(alert.account_ids.is_empty());
    assert_eq!(alert.instrument_ids, vec!["I5".to_string()]);
    assert_eq!(alert.num_events(), Some(2));
    assert_eq!(alert.severity, AlertSeverity::Low);
    assert!((alert.confidence_score - 0.7).abs() < 1e-9, "leakage uses base 0.5");
    assert_eq!(alert.evidence["top_accounts"], serde_json::json!(["L3", "L6"]));
}

// ── Test 10: Rule 5.4 confidence cap ──
#[test]
fn test_information_leakage_confidence_cap() {
    let config = DetectorConfig::default();
    let events: Vec<_> = (1..=6).map(|i| event(&format!("E{i}"), "I6", day(i * 10))).collect();
    let mut trades = Vec::new();
    for e in &events {
        for buyer in ["C1", "C2", "C3"] {
            trades.push(trade(&format!("{}-{buyer}", e.event_id), "I6", buyer, 10.0, 1.0, e.announcement_date - Duration::hours(1)));
        }
    }
    let out = detection::information_leakage(&trades, &events, &config, &engine(&config));
    assert_eq!(out.alerts.len(), 1);
    assert_eq!(out.alerts[0].severity, AlertSeverity::High);
    assert!((out.alerts[0].confidence_score - 0.90).abs() < 1e-9);
}

// ── Test 11: End-to-end detector with persistence and round trip ──
#[test]
fn test_detector_end_to_end_round_trip() {
    let (trades, events) = scenario_i100();
    let mut store = MemoryStore::new();
    store.insert("trades", trades_batch(&trades));
    store.insert("accounts", accounts_batch(&[account("ACC1", &[]), account("BG-001", &["ACC1"])]));
    store.insert("corporate_events", events_batch(&events));

    let config = DetectorConfig { save_intermediates: true, ..Default::default() };
    let detector = InsiderTradingDetector::new(config, store).unwrap();
    let report = detector.run_at(run_time()).unwrap();

    assert_eq!(report.event_source, EventSource::Loaded);
    let pre: Vec<_> = report.alerts.iter().filter(|a| a.rule_id == RuleId::PreAnnouncementTrading).collect();
    assert_eq!(pre.len(), 1);
    assert_eq!(pre[0].account_ids, vec!["ACC1".to_string()]);
    assert_eq!(report.candidate_counts["5.1"], 2);
    assert_eq!(report.total_us, report.timings.iter().map(|t| t.elapsed_us).sum::<u64>());

    let summary = report.summary.as_ref().expect("summary exists when alerts exist");
    assert_eq!(summary.total_alerts, report.alerts.len());
    assert!(!summary.events_synthesized);

    let store = detector.store();
    let written = store.written(ALERTS_CATEGORY, ALERTS_KIND, ALERTS_TABLE).expect("alerts table written");
    assert_eq!(written.num_rows(), report.alerts.len());
    let decoded = alerts_from_batch(&written).unwrap();
    assert_eq!(decoded, report.alerts, "alerts survive the storage encoding unchanged");

    assert!(store.written(ALERTS_CATEGORY, ALERTS_KIND, SUMMARY_TABLE).is_some());
    for rule in RuleId::ALL {
        assert!(
            store.written(INTERMEDIATE_CATEGORY, INTERMEDIATE_KIND, &intermediate_table_name(rule)).is_some(),
            "intermediate table for rule {} missing",
            rule.code()
        );
    }
    let pre_table = store
        .written(INTERMEDIATE_CATEGORY, INTERMEDIATE_KIND, &intermediate_table_name(RuleId::PreAnnouncementTrading))
        .unwrap();
    assert_eq!(pre_table.num_rows(), 2);
}

// ── Test 12: Quiet data writes nothing ──
#[test]
fn test_no_alerts_writes_no_alert_table() {
    let trades = background("I7", 30, 100.0, 10.0);
    let mut store = MemoryStore::new();
    store.insert("trades", trades_batch(&trades));
    store.insert("accounts", accounts_batch(&[account("BG-001", &[])]));
    store.insert("corporate_events", events_batch(&[event("E1", "I7", day(15))]));

    let detector = InsiderTradingDetector::new(DetectorConfig::default(), store).unwrap();
    let report = detector.run_at(run_time()).unwrap();
    assert!(report.alerts.is_empty());
    assert!(report.summary.is_none());
    assert!(detector.store().written_keys().is_empty(), "save_intermediates is off and no alerts exist");
}

// ── Test 13: Missing event table falls back to synthesized events ──
#[test]
fn test_missing_events_are_synthesized() {
    let (trades, _) = scenario_i100();
    let mut store = MemoryStore::new();
    store.insert("trades", trades_batch(&trades));
    store.insert("accounts", accounts_batch(&[account("ACC1", &[])]));

    let config = DetectorConfig { synthetic_event_seed: Some(11), ..Default::default() };
    let detector = InsiderTradingDetector::new(config, store).unwrap();
    let (events, source) = detector.load_or_synthesize_events(&trades).unwrap();
    assert_eq!(source, EventSource::Synthesized);
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.instrument_id == "I100" && e.event_id.starts_with("SYN-")));

    let report = detector.run_at(run_time()).unwrap();
    assert_eq!(report.event_source, EventSource::Synthesized);
    if let Some(summary) = &report.summary {
        assert!(summary.events_synthesized);
    }
}

// ── Test 14: Missing required tables abort the run ──
#[test]
fn test_missing_trades_table_is_error() {
    let mut store = MemoryStore::new();
    store.insert("accounts", accounts_batch(&[account("ACC1", &[])]));
    let detector = InsiderTradingDetector::new(DetectorConfig::default(), store).unwrap();
    let err = detector.run_at(run_time()).unwrap_err();
    assert!(matches!(err, DetectError::MissingTable(ref t) if t == "trades"), "got {err:?}");
    assert!(detector.store().written_keys().is_empty());
}

// ── Test 15: Missing column is reported by name ──
#[test]
fn test_missing_column_is_error() {
    let (trades, _) = scenario_i100();
    let batch = trades_batch(&trades);
    let without_price = batch.project(&[0, 1, 2, 3, 4, 5, 7]).unwrap();
    let mut store = MemoryStore::new();
    store.insert("trades", without_price);
    let err = store.load_table("trades", insider_surveillance::optimize::TRADE_COLUMNS).unwrap_err();
    assert!(matches!(err, DetectError::MissingColumn { ref column, .. } if column == "price"), "got {err:?}");
}

// ── Test 16: Directory store (CSV in, Arrow IPC out) ──
#[test]
fn test_dir_store_csv_input_and_ipc_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (trades, events) = scenario_i100();

    let mut csv = String::from("trade_id,timestamp,instrument_id,buy_account_id,sell_account_id,quantity,price,trade_value\n");
    for t in &trades {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            t.trade_id,
            t.timestamp.format("%Y-%m-%dT%H:%M:%S"),
            t.instrument_id,
            t.buy_account_id,
            t.sell_account_id,
            t.quantity,
            t.price,
            t.trade_value
        ));
    }
    std::fs::write(dir.path().join("trades.csv"), csv).unwrap();
    std::fs::write(
        dir.path().join("accounts.csv"),
        "account_id,beneficial_owner_id,firm_id,related_accounts\nACC1,BO-1,FIRM-1,\"[\"\"ACC2\"\"]\"\nACC2,BO-2,FIRM-1,[]\n",
    )
    .unwrap();

    let mut events_csv = String::from("event_id,instrument_id,event_type,announcement_date\n");
    for e in &events {
        events_csv.push_str(&format!(
            "{},{},{},{}\n",
            e.event_id,
            e.instrument_id,
            e.event_type,
            e.announcement_date.format("%Y-%m-%d")
        ));
    }
    std::fs::write(dir.path().join("corporate_events.csv"), events_csv).unwrap();

    let detector = InsiderTradingDetector::new(DetectorConfig::default(), DirStore::new(dir.path())).unwrap();
    let accounts = detector.load_accounts().unwrap();
    assert_eq!(accounts[0].related_accounts, vec!["ACC2".to_string()]);
    assert!(accounts[1].related_accounts.is_empty());

    let report = detector.run_at(run_time()).unwrap();
    assert_eq!(report.event_source, EventSource::Loaded);
    assert!(report.alerts.iter().any(|a| a.rule_id == RuleId::PreAnnouncementTrading));

    let store = detector.store();
    assert!(store.output_path(ALERTS_CATEGORY, ALERTS_KIND, ALERTS_TABLE).exists());
    let reread = store.read_output(ALERTS_CATEGORY, ALERTS_KIND, ALERTS_TABLE).unwrap().unwrap();
    assert_eq!(alerts_from_batch(&reread).unwrap(), report.alerts);
}

// ── Test 17: Rule 5.2 below min_suspicious_events ──
// N1 qualifies on E1 only; N4 qualifies on E1 and E2. Only N4 alerts.
#[test]
fn test_network_single_event_does_not_alert() {
    let config = DetectorConfig::default();
    let accounts = vec![account("N1", &["N2"]), account("N2", &[]), account("N4", &["N5"]), account("N5", &[])];
    let events = vec![event("E1", "I8", day(10)), event("E2", "I8", day(20))];

    let mut trades = Vec::new();
    for buyer in ["N1", "N2", "N4", "N5"] {
        trades.push(trade(&format!("E1-{buyer}"), "I8", buyer, 10.0, 5.0, day(9)));
    }
    // E2: N1 buys but N2 stays out
    for buyer in ["N1", "N4", "N5"] {
        trades.push(trade(&format!("E2-{buyer}"), "I8", buyer, 10.0, 5.0, day(19)));
    }

    let out = detection::network_trading(&trades, &accounts, &events, &config, &engine(&config));
    let n1: Vec<_> = out.candidates.iter().filter(|c| c.account_id == "N1").collect();
    assert_eq!(n1.len(), 1, "N1 is coordinated on E1 only");
    assert_eq!(out.candidates.iter().filter(|c| c.account_id == "N4").count(), 2);

    assert_eq!(out.alerts.len(), 1, "1 event < min_suspicious_events=2 for N1");
    assert_eq!(out.alerts[0].account_ids, vec!["N4".to_string(), "N5".to_string()]);
    assert!(out.alerts.iter().all(|a| !a.account_ids.contains(&"N1".to_string())));

    let lenient = DetectorConfig { min_suspicious_events: 1, ..Default::default() };
    let out = detection::network_trading(&trades, &accounts, &events, &lenient, &engine(&lenient));
    assert_eq!(out.alerts.len(), 2);
}

// ── Test 18: Intermediate candidate tables on disk ──
#[test]
fn test_intermediates_written_to_dir_store() {
    let dir = tempfile::tempdir().unwrap();
    let (trades, events) = scenario_i100();

    let source = DirStore::new(dir.path());
    for (name, batch) in [
        ("trades", trades_batch(&trades)),
        ("accounts", accounts_batch(&[account("ACC1", &[])])),
        ("corporate_events", events_batch(&events)),
    ] {
        let path = dir.path().join(format!("{name}.arrow"));
        let mut writer =
            arrow::ipc::writer::FileWriter::try_new(std::fs::File::create(&path).unwrap(), &batch.schema()).unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();
    }

    let config = DetectorConfig { save_intermediates: true, ..Default::default() };
    let detector = InsiderTradingDetector::new(config, source).unwrap();
    let report = detector.run_at(run_time()).unwrap();
    assert_eq!(report.candidate_counts["5.1"], 2);

    let pre = detector
        .store()
        .read_output(INTERMEDIATE_CATEGORY, INTERMEDIATE_KIND, &intermediate_table_name(RuleId::PreAnnouncementTrading))
        .unwrap()
        .expect("pre-announcement candidates persisted");
    assert_eq!(pre.num_rows(), 2);
    let accounts = pre.column_by_name("account_id").unwrap().as_string::<i32>();
    assert!(accounts.iter().all(|a| a == Some("ACC1")));
}

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow_array::RecordBatch;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::DetectorConfig;
use crate::error::{DetectError, Result};
use crate::optimize::{self, utc_timestamp_type, Tabular};
use crate::types::EventSource;

pub const CATEGORY: &str = "insider_trading";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

impl AlertSeverity {
    pub fn label(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "low" => Some(AlertSeverity::Low),
            "medium" => Some(AlertSeverity::Medium),
            "high" => Some(AlertSeverity::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RuleId {
    PreAnnouncementTrading,
    NetworkTrading,
    AbnormalProfit,
    InformationLeakage,
}

impl RuleId {
    pub const ALL: [RuleId; 4] = [
        RuleId::PreAnnouncementTrading,
        RuleId::NetworkTrading,
        RuleId::AbnormalProfit,
        RuleId::InformationLeakage,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            RuleId::PreAnnouncementTrading => "5.1",
            RuleId::NetworkTrading => "5.2",
            RuleId::AbnormalProfit => "5.3",
            RuleId::InformationLeakage => "5.4",
        }
    }

    /// Short name used for intermediate table names and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            RuleId::PreAnnouncementTrading => "pre_announcement",
            RuleId::NetworkTrading => "network",
            RuleId::AbnormalProfit => "abnormal_profit",
            RuleId::InformationLeakage => "information_leakage",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        RuleId::ALL.into_iter().find(|r| r.code() == code)
    }
}

/// `confidence = min(cap, base + n / 10)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceProfile {
    pub base: f64,
    pub cap: f64,
}

/// Rules 5.1 to 5.3.
pub const ACCOUNT_CONFIDENCE: ConfidenceProfile = ConfidenceProfile { base: 0.6, cap: 0.95 };

/// Rule 5.4 keeps its own lower base and cap.
pub const LEAKAGE_CONFIDENCE: ConfidenceProfile = ConfidenceProfile { base: 0.5, cap: 0.90 };

impl ConfidenceProfile {
    pub fn score(&self, occurrences: usize) -> f64 {
        (self.base + occurrences as f64 / 10.0).min(self.cap)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub alert_id: String,
    pub category: String,
    pub rule_id: RuleId,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    pub account_ids: Vec<String>,
    pub instrument_ids: Vec<String>,
    pub description: String,
    pub evidence: Map<String, Value>,
    pub confidence_score: f64,
}

impl Alert {
    pub fn num_events(&self) -> Option<u64> {
        self.evidence.get("num_events").and_then(Value::as_u64)
    }
}

/// Scores and builds alerts. One engine per detection run; every alert it
/// builds carries the same generation timestamp, kept at millisecond
/// precision to match the stored column.
pub struct AlertEngine {
    pub severity_high_occurrences: usize,
    pub severity_medium_occurrences: usize,
    generated_at: DateTime<Utc>,
}

impl AlertEngine {
    pub fn new(config: &DetectorConfig, generated_at: DateTime<Utc>) -> Self {
        Self {
            severity_high_occurrences: config.severity_high_occurrences,
            severity_medium_occurrences: config.severity_medium_occurrences,
            generated_at: generated_at.trunc_subsecs(3),
        }
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn severity(&self, occurrences: usize) -> AlertSeverity {
        if occurrences >= self.severity_high_occurrences {
            AlertSeverity::High
        } else if occurrences >= self.severity_medium_occurrences {
            AlertSeverity::Medium
        } else {
            AlertSeverity::Low
        }
    }

    /// Build an account-level alert scored by the shared helper.
    pub fn raise(
        &self,
        rule_id: RuleId,
        occurrences: usize,
        account_ids: Vec<String>,
        instrument_ids: Vec<String>,
        description: String,
        evidence: Map<String, Value>,
    ) -> Alert {
        let severity = self.severity(occurrences);
        let confidence = ACCOUNT_CONFIDENCE.score(occurrences);
        self.raise_scored(rule_id, severity, confidence, occurrences, account_ids, instrument_ids, description, evidence)
    }

    /// Build an alert whose severity and confidence the caller already computed.
    #[allow(clippy::too_many_arguments)]
    pub fn raise_scored(
        &self,
        rule_id: RuleId,
        severity: AlertSeverity,
        confidence_score: f64,
        occurrences: usize,
        account_ids: Vec<String>,
        instrument_ids: Vec<String>,
        description: String,
        mut evidence: Map<String, Value>,
    ) -> Alert {
        evidence.insert("num_events".to_string(), Value::from(occurrences as u64));
        Alert {
            alert_id: Uuid::new_v4().to_string(),
            category: CATEGORY.to_string(),
            rule_id,
            severity,
            timestamp: self.generated_at,
            account_ids,
            instrument_ids,
            description,
            evidence,
            confidence_score,
        }
    }
}

// ── Storage encoding ──

/// Flat storage form of an [`Alert`]: list and map fields as JSON strings.
#[derive(Debug, Serialize)]
struct AlertRecord {
    alert_id: String,
    category: String,
    rule_id: String,
    severity: String,
    timestamp: DateTime<Utc>,
    account_ids: String,
    instrument_ids: String,
    description: String,
    evidence: String,
    confidence_score: f64,
}

impl Tabular for AlertRecord {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("alert_id", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("rule_id", DataType::Utf8, false),
            Field::new("severity", DataType::Utf8, false),
            Field::new("timestamp", utc_timestamp_type(), false),
            Field::new("account_ids", DataType::Utf8, false),
            Field::new("instrument_ids", DataType::Utf8, false),
            Field::new("description", DataType::Utf8, false),
            Field::new("evidence", DataType::Utf8, false),
            Field::new("confidence_score", DataType::Float64, false),
        ]))
    }
}

pub fn alerts_schema() -> SchemaRef {
    AlertRecord::schema()
}

pub fn alerts_to_batch(alerts: &[Alert]) -> Result<RecordBatch> {
    let records = alerts
        .iter()
        .map(|a| -> Result<AlertRecord> {
            Ok(AlertRecord {
                alert_id: a.alert_id.clone(),
                category: a.category.clone(),
                rule_id: a.rule_id.code().to_string(),
                severity: a.severity.label().to_string(),
                timestamp: a.timestamp,
                account_ids: serde_json::to_string(&a.account_ids)?,
                instrument_ids: serde_json::to_string(&a.instrument_ids)?,
                description: a.description.clone(),
                evidence: serde_json::to_string(&a.evidence)?,
                confidence_score: a.confidence_score,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    optimize::to_batch(&records)
}

pub fn alerts_from_batch(batch: &RecordBatch) -> Result<Vec<Alert>> {
    const T: &str = "alerts";
    let decode = |reason: String| DetectError::Decode { table: T.to_string(), reason };

    let ids = optimize::strings(T, batch, "alert_id")?;
    let categories = optimize::strings(T, batch, "category")?;
    let rules = optimize::strings(T, batch, "rule_id")?;
    let severities = optimize::strings(T, batch, "severity")?;
    let stamps = optimize::timestamps(T, batch, "timestamp")?;
    let accounts = optimize::strings(T, batch, "account_ids")?;
    let instruments = optimize::strings(T, batch, "instrument_ids")?;
    let descriptions = optimize::strings(T, batch, "description")?;
    let evidence = optimize::strings(T, batch, "evidence")?;
    let confidences = optimize::floats(T, batch, "confidence_score")?;

    (0..batch.num_rows())
        .map(|i| -> Result<Alert> {
            let rule_code = rules[i].as_deref().unwrap_or_default();
            let severity_label = severities[i].as_deref().unwrap_or_default();
            Ok(Alert {
                alert_id: ids[i].clone().unwrap_or_default(),
                category: categories[i].clone().unwrap_or_default(),
                rule_id: RuleId::from_code(rule_code)
                    .ok_or_else(|| decode(format!("row {i}: unknown rule_id {rule_code:?}")))?,
                severity: AlertSeverity::parse(severity_label)
                    .ok_or_else(|| decode(format!("row {i}: unknown severity {severity_label:?}")))?,
                timestamp: stamps[i].ok_or_else(|| decode(format!("row {i}: null timestamp")))?,
                account_ids: serde_json::from_str(accounts[i].as_deref().unwrap_or("[]"))?,
                instrument_ids: serde_json::from_str(instruments[i].as_deref().unwrap_or("[]"))?,
                description: descriptions[i].clone().unwrap_or_default(),
                evidence: serde_json::from_str(evidence[i].as_deref().unwrap_or("{}"))?,
                confidence_score: confidences[i].unwrap_or_default(),
            })
        })
        .collect()
}

// ── Summary ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub total_alerts: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_rule: BTreeMap<String, usize>,
    pub avg_confidence: f64,
    pub unique_accounts: usize,
    pub events_synthesized: bool,
}

impl AlertSummary {
    pub fn from_alerts(alerts: &[Alert], event_source: EventSource) -> Self {
        let mut by_severity = BTreeMap::new();
        let mut by_rule = BTreeMap::new();
        let mut accounts = BTreeSet::new();
        for alert in alerts {
            *by_severity.entry(alert.severity.label().to_string()).or_insert(0) += 1;
            *by_rule.entry(alert.rule_id.code().to_string()).or_insert(0) += 1;
            accounts.extend(alert.account_ids.iter().map(String::as_str));
        }
        let avg_confidence = if alerts.is_empty() {
            0.0
        } else {
            alerts.iter().map(|a| a.confidence_score).sum::<f64>() / alerts.len() as f64
        };

        Self {
            total_alerts: alerts.len(),
            by_severity,
            by_rule,
            avg_confidence,
            unique_accounts: accounts.len(),
            events_synthesized: event_source == EventSource::Synthesized,
        }
    }

    pub fn to_batch(&self) -> Result<RecordBatch> {
        let record = SummaryRecord {
            total_alerts: self.total_alerts as u64,
            by_severity: serde_json::to_string(&self.by_severity)?,
            by_rule: serde_json::to_string(&self.by_rule)?,
            avg_confidence: self.avg_confidence,
            unique_accounts: self.unique_accounts as u64,
            events_synthesized: self.events_synthesized,
        };
        optimize::to_batch(&[record])
    }
}

impl fmt::Display for AlertSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Total alerts:       {}", self.total_alerts)?;
        writeln!(f, "  Unique accounts:    {}", self.unique_accounts)?;
        writeln!(f, "  Avg confidence:     {:.3}", self.avg_confidence)?;
        writeln!(f, "  By severity:")?;
        for (severity, count) in &self.by_severity {
            writeln!(f, "    {:<10} {}", severity, count)?;
        }
        writeln!(f, "  By rule:")?;
        for (rule, count) in &self.by_rule {
            writeln!(f, "    {:<10} {}", rule, count)?;
        }
        if self.events_synthesized {
            writeln!(f, "  NOTE: corporate events were synthesized; treat alerts as indicative only")?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SummaryRecord {
    total_alerts: u64,
    by_severity: String,
    by_rule: String,
    avg_confidence: f64,
    unique_accounts: u64,
    events_synthesized: bool,
}

impl Tabular for SummaryRecord {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("total_alerts", DataType::Int64, false),
            Field::new("by_severity", DataType::Utf8, false),
            Field::new("by_rule", DataType::Utf8, false),
            Field::new("avg_confidence", DataType::Float64, false),
            Field::new("unique_accounts", DataType::Int64, false),
            Field::new("events_synthesized", DataType::Boolean, false),
        ]))
    }
}

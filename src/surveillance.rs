use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, warn, Span};

use crate::alerts::{self, Alert, AlertEngine, AlertSummary, RuleId};
use crate::config::DetectorConfig;
use crate::detection::{self, RuleOutput};
use crate::error::{DetectError, Result};
use crate::generator::EventSynthesizer;
use crate::optimize::{self, Tabular};
use crate::store::{project_columns, TableStore};
use crate::timing::{RunTimer, StageTiming};
use crate::types::*;

pub const TRADES_TABLE: &str = "trades";
pub const ACCOUNTS_TABLE: &str = "accounts";
pub const EVENTS_TABLE: &str = "corporate_events";

pub const ALERTS_CATEGORY: &str = "alerts";
pub const ALERTS_KIND: &str = alerts::CATEGORY;
pub const ALERTS_TABLE: &str = "alerts";
pub const SUMMARY_TABLE: &str = "summary";
pub const INTERMEDIATE_CATEGORY: &str = "surveillance";
pub const INTERMEDIATE_KIND: &str = "intermediate";

pub fn intermediate_table_name(rule_id: RuleId) -> String {
    format!("insider_{}_candidates", rule_id.label())
}

/// Outputs of all four rules for one run.
#[derive(Debug, Clone)]
pub struct RuleOutputs {
    pub pre_announcement: RuleOutput<PreAnnouncementCandidate>,
    pub network: RuleOutput<NetworkCandidate>,
    pub abnormal_profit: RuleOutput<ProfitCandidate>,
    pub information_leakage: RuleOutput<LeakageCandidate>,
}

impl RuleOutputs {
    /// All alerts in rule order.
    pub fn alerts(&self) -> Vec<Alert> {
        let mut all = Vec::new();
        all.extend(self.pre_announcement.alerts.iter().cloned());
        all.extend(self.network.alerts.iter().cloned());
        all.extend(self.abnormal_profit.alerts.iter().cloned());
        all.extend(self.information_leakage.alerts.iter().cloned());
        all
    }

    pub fn candidate_counts(&self) -> BTreeMap<String, usize> {
        BTreeMap::from([
            (RuleId::PreAnnouncementTrading.code().to_string(), self.pre_announcement.candidates.len()),
            (RuleId::NetworkTrading.code().to_string(), self.network.candidates.len()),
            (RuleId::AbnormalProfit.code().to_string(), self.abnormal_profit.candidates.len()),
            (RuleId::InformationLeakage.code().to_string(), self.information_leakage.candidates.len()),
        ])
    }
}

/// Run rules 5.1 → 5.4 in order over already-normalized inputs.
pub fn evaluate_rules(
    trades: &[Trade],
    accounts: &[Account],
    events: &[CorporateEvent],
    config: &DetectorConfig,
    engine: &AlertEngine,
    timer: &mut RunTimer,
) -> RuleOutputs {
    let pre_announcement = timer.time("rule_5.1", || {
        detection::pre_announcement_trading(trades, events, config, engine)
    });
    let network = timer.time("rule_5.2", || {
        detection::network_trading(trades, accounts, events, config, engine)
    });
    let abnormal_profit = timer.time("rule_5.3", || detection::abnormal_profits(trades, events, config, engine));
    let information_leakage = timer.time("rule_5.4", || {
        detection::information_leakage(trades, events, config, engine)
    });

    for (rule, candidates, alerts) in [
        (pre_announcement.rule_id, pre_announcement.candidates.len(), pre_announcement.alerts.len()),
        (network.rule_id, network.candidates.len(), network.alerts.len()),
        (abnormal_profit.rule_id, abnormal_profit.candidates.len(), abnormal_profit.alerts.len()),
        (information_leakage.rule_id, information_leakage.candidates.len(), information_leakage.alerts.len()),
    ] {
        info!(rule = rule.code(), name = rule.label(), candidates, alerts, "rule evaluated");
    }

    RuleOutputs { pre_announcement, network, abnormal_profit, information_leakage }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub generated_at: DateTime<Utc>,
    pub alerts: Vec<Alert>,
    /// Present only when at least one alert was raised.
    pub summary: Option<AlertSummary>,
    pub candidate_counts: BTreeMap<String, usize>,
    pub event_source: EventSource,
    pub timings: Vec<StageTiming>,
    /// Sum of all stage timings.
    pub total_us: u64,
}

/// Loads the source tables, runs the four rules and persists the results.
///
/// The detector owns no global state: log records go to whatever subscriber
/// the caller installed, inside the span given by [`with_span`](Self::with_span).
pub struct InsiderTradingDetector<S: TableStore> {
    config: DetectorConfig,
    store: S,
    span: Span,
}

impl<S: TableStore> InsiderTradingDetector<S> {
    pub fn new(config: DetectorConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            span: info_span!("insider_detection"),
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn run(&self) -> Result<DetectionReport> {
        self.run_at(Utc::now())
    }

    /// Same as [`run`](Self::run) with an explicit alert generation time.
    pub fn run_at(&self, generated_at: DateTime<Utc>) -> Result<DetectionReport> {
        let _entered = self.span.enter();
        let result = self.execute(generated_at);
        if let Err(e) = &result {
            error!(error = %e, "insider-trading detection aborted");
        }
        result
    }

    fn execute(&self, generated_at: DateTime<Utc>) -> Result<DetectionReport> {
        let mut timer = RunTimer::new();

        let load_start = timer.start();
        let trades = self.load_trades()?;
        let accounts = self.load_accounts()?;
        let (events, event_source) = self.load_or_synthesize_events(&trades)?;
        timer.record("load", load_start);
        info!(
            trades = trades.len(),
            accounts = accounts.len(),
            events = events.len(),
            event_source = ?event_source,
            "inputs loaded"
        );

        let engine = AlertEngine::new(&self.config, generated_at);
        let outputs = evaluate_rules(&trades, &accounts, &events, &self.config, &engine, &mut timer);
        let alerts = outputs.alerts();

        let persist_start = timer.start();
        if self.config.save_intermediates {
            self.save_candidates(RuleId::PreAnnouncementTrading, &outputs.pre_announcement.candidates)?;
            self.save_candidates(RuleId::NetworkTrading, &outputs.network.candidates)?;
            self.save_candidates(RuleId::AbnormalProfit, &outputs.abnormal_profit.candidates)?;
            self.save_candidates(RuleId::InformationLeakage, &outputs.information_leakage.candidates)?;
        }

        let summary = if alerts.is_empty() {
            info!("no insider-trading alerts raised");
            None
        } else {
            self.store
                .write_table(&alerts::alerts_to_batch(&alerts)?, ALERTS_CATEGORY, ALERTS_KIND, ALERTS_TABLE)?;
            let summary = AlertSummary::from_alerts(&alerts, event_source);
            self.store
                .write_table(&summary.to_batch()?, ALERTS_CATEGORY, ALERTS_KIND, SUMMARY_TABLE)?;
            info!(
                total = summary.total_alerts,
                unique_accounts = summary.unique_accounts,
                avg_confidence = summary.avg_confidence,
                "alerts persisted"
            );
            Some(summary)
        };
        timer.record("persist", persist_start);

        Ok(DetectionReport {
            generated_at: engine.generated_at(),
            candidate_counts: outputs.candidate_counts(),
            alerts,
            summary,
            event_source,
            timings: timer.stages().to_vec(),
            total_us: timer.total_us(),
        })
    }

    pub fn load_trades(&self) -> Result<Vec<Trade>> {
        let batch = self
            .store
            .load_table(TRADES_TABLE, optimize::TRADE_COLUMNS)?
            .ok_or_else(|| DetectError::MissingTable(TRADES_TABLE.to_string()))?;
        optimize::trades_from_batch(&batch)
    }

    pub fn load_accounts(&self) -> Result<Vec<Account>> {
        let batch = self
            .store
            .load_table(ACCOUNTS_TABLE, optimize::ACCOUNT_COLUMNS)?
            .ok_or_else(|| DetectError::MissingTable(ACCOUNTS_TABLE.to_string()))?;
        optimize::accounts_from_batch(&batch)
    }

    /// Load `corporate_events`, or fabricate weekly events from `trades` when
    /// the table does not exist. The fallback is logged at WARN and reported
    /// as [`EventSource::Synthesized`].
    pub fn load_or_synthesize_events(&self, trades: &[Trade]) -> Result<(Vec<CorporateEvent>, EventSource)> {
        match self.store.load_table(EVENTS_TABLE, &[])? {
            Some(batch) => {
                let mut columns: Vec<&str> = optimize::EVENT_COLUMNS.to_vec();
                if batch.column_by_name("event_date").is_some() {
                    columns.push("event_date");
                }
                let batch = project_columns(EVENTS_TABLE, &batch, &columns)?;
                Ok((optimize::events_from_batch(&batch)?, EventSource::Loaded))
            }
            None => {
                let events = EventSynthesizer::new(self.config.synthetic_event_seed).synthesize(trades);
                warn!(
                    table = EVENTS_TABLE,
                    events = events.len(),
                    "event table not found; using synthesized events, alerts are not grounded in real announcements"
                );
                Ok((events, EventSource::Synthesized))
            }
        }
    }

    fn save_candidates<C: Tabular>(&self, rule_id: RuleId, rows: &[C]) -> Result<()> {
        let batch = optimize::to_batch(rows)?;
        self.store
            .write_table(&batch, INTERMEDIATE_CATEGORY, INTERMEDIATE_KIND, &intermediate_table_name(rule_id))
    }
}

//! Conversion between Arrow tables and the typed rows the rules work on.
//!
//! Inbound, columns are cast to the expected types (timestamps may arrive as
//! Arrow timestamps, dates, epoch milliseconds or ISO-8601 strings), embedded
//! list columns are parsed, and rows missing a required key are dropped.
//! Outbound, any `Serialize` row type with a fixed schema becomes a batch.

use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Schema, SchemaRef, TimeUnit, TimestampMillisecondType};
use arrow::json::ReaderBuilder;
use arrow_array::RecordBatch;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DetectError, Result};
use crate::types::*;

pub const TRADE_COLUMNS: &[&str] = &[
    "trade_id",
    "timestamp",
    "instrument_id",
    "buy_account_id",
    "sell_account_id",
    "quantity",
    "price",
    "trade_value",
];

pub const ACCOUNT_COLUMNS: &[&str] = &["account_id", "beneficial_owner_id", "firm_id", "related_accounts"];

/// `event_date` is read when present but not required.
pub const EVENT_COLUMNS: &[&str] = &["event_id", "instrument_id", "event_type", "announcement_date"];

/// Millisecond timestamps tagged with a fixed `+00:00` offset. Named zones
/// would need arrow's `chrono-tz` feature to parse.
pub fn utc_timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, Some("+00:00".into()))
}

// ── Column accessors ──

fn column<'a>(table: &str, batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch.column_by_name(name).ok_or_else(|| DetectError::MissingColumn {
        table: table.to_string(),
        column: name.to_string(),
    })
}

pub(crate) fn strings(table: &str, batch: &RecordBatch, name: &str) -> Result<Vec<Option<String>>> {
    let utf8 = cast(column(table, batch, name)?, &DataType::Utf8)?;
    Ok(utf8.as_string::<i32>().iter().map(|v| v.map(str::to_string)).collect())
}

pub(crate) fn floats(table: &str, batch: &RecordBatch, name: &str) -> Result<Vec<Option<f64>>> {
    let values = cast(column(table, batch, name)?, &DataType::Float64)?;
    Ok(values.as_primitive::<Float64Type>().iter().collect())
}

/// Unparseable values come back as `None`, same as nulls.
pub(crate) fn timestamps(table: &str, batch: &RecordBatch, name: &str) -> Result<Vec<Option<DateTime<Utc>>>> {
    let raw = column(table, batch, name)?;
    let millis = match raw.data_type() {
        DataType::Timestamp(TimeUnit::Millisecond, _) => raw.clone(),
        _ => cast(raw, &DataType::Timestamp(TimeUnit::Millisecond, None))?,
    };
    Ok(millis
        .as_primitive::<TimestampMillisecondType>()
        .iter()
        .map(|v| v.and_then(DateTime::from_timestamp_millis))
        .collect())
}

// ── Source tables → typed rows ──

pub fn trades_from_batch(batch: &RecordBatch) -> Result<Vec<Trade>> {
    const T: &str = "trades";
    let trade_ids = strings(T, batch, "trade_id")?;
    let stamps = timestamps(T, batch, "timestamp")?;
    let instruments = strings(T, batch, "instrument_id")?;
    let buyers = strings(T, batch, "buy_account_id")?;
    let sellers = strings(T, batch, "sell_account_id")?;
    let quantities = floats(T, batch, "quantity")?;
    let prices = floats(T, batch, "price")?;
    let values = floats(T, batch, "trade_value")?;

    let mut trades = Vec::with_capacity(batch.num_rows());
    let mut dropped = 0usize;
    for i in 0..batch.num_rows() {
        let (Some(timestamp), Some(instrument_id)) = (stamps[i], instruments[i].clone()) else {
            dropped += 1;
            continue;
        };
        let quantity = quantities[i].unwrap_or(0.0);
        let price = prices[i].unwrap_or(0.0);
        trades.push(Trade {
            trade_id: trade_ids[i].clone().unwrap_or_default(),
            timestamp,
            instrument_id,
            buy_account_id: buyers[i].clone().unwrap_or_default(),
            sell_account_id: sellers[i].clone().unwrap_or_default(),
            quantity,
            price,
            trade_value: values[i].unwrap_or(quantity * price),
        });
    }

    if dropped > 0 {
        warn!(table = T, dropped, "dropped rows with null timestamp or instrument");
    }
    debug!(table = T, rows = trades.len(), "normalized");
    Ok(trades)
}

pub fn accounts_from_batch(batch: &RecordBatch) -> Result<Vec<Account>> {
    const T: &str = "accounts";
    let ids = strings(T, batch, "account_id")?;
    let owners = strings(T, batch, "beneficial_owner_id")?;
    let firms = strings(T, batch, "firm_id")?;
    let related = strings(T, batch, "related_accounts")?;

    let accounts: Vec<Account> = (0..batch.num_rows())
        .filter_map(|i| {
            let account_id = ids[i].clone()?;
            Some(Account {
                account_id,
                beneficial_owner_id: owners[i].clone(),
                firm_id: firms[i].clone(),
                related_accounts: related[i].as_deref().map(parse_related_accounts).unwrap_or_default(),
            })
        })
        .collect();

    debug!(table = T, rows = accounts.len(), "normalized");
    Ok(accounts)
}

pub fn events_from_batch(batch: &RecordBatch) -> Result<Vec<CorporateEvent>> {
    const T: &str = "corporate_events";
    let ids = strings(T, batch, "event_id")?;
    let instruments = strings(T, batch, "instrument_id")?;
    let kinds = strings(T, batch, "event_type")?;
    let announced = timestamps(T, batch, "announcement_date")?;
    let effective = match batch.column_by_name("event_date") {
        Some(_) => timestamps(T, batch, "event_date")?,
        None => vec![None; batch.num_rows()],
    };

    let mut events = Vec::with_capacity(batch.num_rows());
    let mut dropped = 0usize;
    for i in 0..batch.num_rows() {
        let (Some(announcement_date), Some(instrument_id)) = (announced[i], instruments[i].clone()) else {
            dropped += 1;
            continue;
        };
        events.push(CorporateEvent {
            event_id: ids[i].clone().unwrap_or_else(|| format!("EVT-{i:06}")),
            instrument_id,
            event_type: kinds[i].clone().unwrap_or_else(|| "unknown".to_string()),
            announcement_date,
            event_date: effective[i],
        });
    }

    if dropped > 0 {
        warn!(table = T, dropped, "dropped rows with null announcement_date or instrument");
    }
    debug!(table = T, rows = events.len(), "normalized");
    Ok(events)
}

/// Parse a `related_accounts` cell. Accepts a JSON list, a Python-style
/// single-quoted list, or a bare comma-separated string.
pub fn parse_related_accounts(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || ["[]", "null", "none", "nan"].iter().any(|e| trimmed.eq_ignore_ascii_case(e)) {
        return Vec::new();
    }

    let parsed = serde_json::from_str::<Vec<String>>(trimmed)
        .or_else(|_| serde_json::from_str::<Vec<String>>(&trimmed.replace('\'', "\"")))
        .unwrap_or_else(|_| {
            trimmed
                .trim_start_matches('[')
                .trim_end_matches(']')
                .split(',')
                .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
                .collect()
        });

    let mut out: Vec<String> = Vec::with_capacity(parsed.len());
    for id in parsed {
        let id = id.trim().to_string();
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

// ── Typed rows → tables ──

/// A row type with a fixed Arrow schema.
pub trait Tabular: Serialize {
    fn schema() -> SchemaRef;
}

pub fn to_batch<T: Tabular>(rows: &[T]) -> Result<RecordBatch> {
    let schema = T::schema();
    if rows.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    let mut decoder = ReaderBuilder::new(schema.clone())
        .with_batch_size(rows.len())
        .build_decoder()?;
    decoder.serialize(rows)?;
    decoder.flush()?.ok_or_else(|| DetectError::Decode {
        table: format!("{:?}", schema.fields().iter().map(|f| f.name()).collect::<Vec<_>>()),
        reason: "serializer produced no rows".to_string(),
    })
}

fn utf8(name: &str) -> Field {
    Field::new(name, DataType::Utf8, false)
}

fn float(name: &str) -> Field {
    Field::new(name, DataType::Float64, false)
}

fn int(name: &str) -> Field {
    Field::new(name, DataType::Int64, false)
}

fn announced() -> Field {
    Field::new("announcement_date", utc_timestamp_type(), false)
}

impl Tabular for PreAnnouncementCandidate {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            utf8("event_id"),
            utf8("instrument_id"),
            utf8("account_id"),
            announced(),
            int("trade_count"),
            float("pre_window_volume"),
            float("baseline_mean_daily_volume"),
            float("baseline_std_daily_volume"),
            float("volume_ratio"),
        ]))
    }
}

impl Tabular for NetworkCandidate {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            utf8("event_id"),
            utf8("instrument_id"),
            utf8("account_id"),
            announced(),
            Field::new(
                "related_active",
                DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
                false,
            ),
            int("related_count"),
        ]))
    }
}

impl Tabular for ProfitCandidate {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            utf8("event_id"),
            utf8("instrument_id"),
            utf8("account_id"),
            announced(),
            float("avg_buy_price"),
            float("post_avg_price"),
            float("return_pct"),
            float("quantity"),
        ]))
    }
}

impl Tabular for LeakageCandidate {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            utf8("event_id"),
            utf8("instrument_id"),
            announced(),
            int("account_count"),
            float("total_volume"),
            utf8("top_account"),
        ]))
    }
}

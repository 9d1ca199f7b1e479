//! Token and cost accounting per document, plus the recomputed global snapshot.
//!
//! Stored values are read with a zero-default policy: a missing record, a missing
//! field, `null`, an empty string or an unparseable value all count as zero. Only
//! [`UsageLedger`] writes totals, and it does so under a single lock so an
//! incremental update never interleaves with another read-modify-write.

use crate::storage::{StoreError, UsageStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// Usage reported for one top-level provider call (single-shot or a whole
/// continuation sequence).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// USD. Zero when the model has no pricing entry.
    pub cost: f64,
    /// Model id that served the call.
    pub model: String,
}

/// Running totals for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub prompt_tokens: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub completion_tokens: u64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cost: f64,
    /// One human-readable entry per provider call, oldest first.
    #[serde(default, deserialize_with = "lenient_log")]
    pub log: Vec<String>,
}

impl UsageTotals {
    /// The log rendered as bullet lines joined by newlines.
    pub fn log_text(&self) -> String {
        self.log
            .iter()
            .map(|entry| format!("- {}", entry))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Sum of every document's totals at the time of the last recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalTotals {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub prompt_tokens: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub completion_tokens: u64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cost: f64,
    /// Number of documents that contributed.
    #[serde(default)]
    pub documents: usize,
    pub computed_at: DateTime<Utc>,
}

/// Format a usage log line for one call.
pub fn usage_log_entry(label: &str, usage: &CallUsage) -> String {
    format!(
        "{} - Prompt tokens: {}, Completion tokens: {}, Cost: ${} ({})",
        label, usage.prompt_tokens, usage.completion_tokens, usage.cost, usage.model
    )
}

fn coerce_u64(value: Option<Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && *f > 0.0)
                        .map(|f| f as u64)
                })
                .unwrap_or(0)
        }
        _ => 0,
    }
}

fn coerce_f64(value: Option<Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite() && *f > 0.0).unwrap_or(0.0)
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(coerce_u64(Option::<Value>::deserialize(deserializer)?))
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(coerce_f64(Option::<Value>::deserialize(deserializer)?))
}

/// Accepts an array of entries, or a legacy newline-joined `"- entry"` string.
fn lenient_log<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let entries = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Some(Value::String(s)) => s
            .lines()
            .map(|line| line.strip_prefix("- ").unwrap_or(line).to_string())
            .filter(|line| !line.trim().is_empty())
            .collect(),
        _ => Vec::new(),
    };
    Ok(entries)
}

/// Read-modify-write owner for usage totals.
pub struct UsageLedger {
    store: Arc<dyn UsageStore>,
    write_lock: Mutex<()>,
    batch_size: usize,
}

impl UsageLedger {
    /// Documents scanned per batch during global recomputation.
    pub const DEFAULT_BATCH_SIZE: usize = 50;

    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Current totals for a document (all zero if nothing was recorded yet).
    pub fn totals(&self, document_id: u64) -> Result<UsageTotals, StoreError> {
        Ok(self.store.load_totals(document_id)?.unwrap_or_default())
    }

    /// Append a log entry and return the updated log text.
    pub fn append_log_entry(&self, document_id: u64, text: &str) -> Result<String, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut totals = self.totals(document_id)?;
        totals.log.push(text.to_string());
        self.store.save_totals(document_id, &totals)?;
        Ok(totals.log_text())
    }

    /// Add deltas to a document's totals and return the new totals.
    pub fn accumulate_totals(
        &self,
        document_id: u64,
        prompt_tokens: u64,
        completion_tokens: u64,
        cost: f64,
    ) -> Result<UsageTotals, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut totals = self.totals(document_id)?;
        add_usage(&mut totals, prompt_tokens, completion_tokens, cost);
        self.store.save_totals(document_id, &totals)?;
        Ok(totals)
    }

    /// Log and accumulate one provider call in a single write.
    pub fn record_call(
        &self,
        document_id: u64,
        label: &str,
        usage: &CallUsage,
    ) -> Result<UsageTotals, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut totals = self.totals(document_id)?;
        totals.log.push(usage_log_entry(label, usage));
        add_usage(
            &mut totals,
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.cost,
        );
        self.store.save_totals(document_id, &totals)?;
        tracing::debug!(
            document_id,
            prompt_tokens = totals.prompt_tokens,
            completion_tokens = totals.completion_tokens,
            cost = totals.cost,
            "usage recorded"
        );
        Ok(totals)
    }

    /// Sum every document's totals from scratch and store the snapshot.
    ///
    /// This is a full scan on purpose: the snapshot is never updated
    /// incrementally, so any drift is corrected by the next recomputation.
    pub fn recompute_global_totals(&self) -> Result<GlobalTotals, StoreError> {
        let mut prompt_tokens = 0u64;
        let mut completion_tokens = 0u64;
        let mut cost = 0.0f64;
        let mut documents = 0usize;
        let mut offset = 0usize;

        loop {
            let batch = self.store.list_documents(offset, self.batch_size)?;
            if batch.is_empty() {
                break;
            }
            for document_id in &batch {
                let totals = self.totals(*document_id)?;
                prompt_tokens = prompt_tokens.saturating_add(totals.prompt_tokens);
                completion_tokens = completion_tokens.saturating_add(totals.completion_tokens);
                cost += totals.cost;
                documents += 1;
            }
            offset += batch.len();
        }

        let snapshot = GlobalTotals {
            prompt_tokens,
            completion_tokens,
            cost,
            documents,
            computed_at: Utc::now(),
        };
        self.store.save_global(&snapshot)?;
        tracing::info!(
            documents,
            prompt_tokens,
            completion_tokens,
            cost,
            "global usage totals recomputed"
        );
        Ok(snapshot)
    }

    /// The last stored global snapshot, if one was ever computed.
    pub fn global_totals(&self) -> Result<Option<GlobalTotals>, StoreError> {
        self.store.load_global()
    }
}

fn add_usage(totals: &mut UsageTotals, prompt_tokens: u64, completion_tokens: u64, cost: f64) {
    totals.prompt_tokens = totals.prompt_tokens.saturating_add(prompt_tokens);
    totals.completion_tokens = totals.completion_tokens.saturating_add(completion_tokens);
    if cost.is_finite() && cost > 0.0 {
        totals.cost += cost;
    }
}

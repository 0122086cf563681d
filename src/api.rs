use crate::model::{
    FinishedTransaction, ResponseContext, Span, SpanContext, StackFrame, UserContext,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

const AGENT_NAME: &str = "rust";

fn to_epoch_micros(time: DateTime<Utc>) -> i64 {
    time.timestamp() * 1_000_000 + i64::from(time.timestamp_subsec_micros())
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct RawAgent {
    name: String,
    version: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct RawService {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
    agent: RawAgent,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct RawMetadata {
    service: RawService,
}

impl RawMetadata {
    pub fn new(service: &str, env: &Option<String>) -> RawMetadata {
        RawMetadata {
            service: RawService {
                name: service.to_string(),
                environment: env.clone(),
                agent: RawAgent {
                    name: AGENT_NAME.to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            },
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct RawSpanCount {
    started: usize,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct RawTransactionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<ResponseContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserContext>,
    tags: HashMap<String, String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct RawTransaction {
    id: String,
    trace_id: String,
    name: String,
    r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    /// Microseconds since the epoch.
    timestamp: i64,
    /// Milliseconds.
    duration: f64,
    span_count: RawSpanCount,
    context: RawTransactionContext,
    sampled: bool,
}

impl RawTransaction {
    pub fn from_transaction(finished: &FinishedTransaction) -> RawTransaction {
        let transaction = finished.transaction();
        RawTransaction {
            id: transaction.id.clone(),
            trace_id: transaction.trace_id.clone(),
            name: transaction.name.clone(),
            r#type: transaction
                .meta
                .as_ref()
                .map(|meta| meta.r#type.clone())
                .unwrap_or_else(|| "HTTP".to_string()),
            result: transaction
                .meta
                .as_ref()
                .map(|meta| meta.result.to_string()),
            timestamp: to_epoch_micros(transaction.timestamp),
            duration: finished.duration_ms(),
            span_count: RawSpanCount {
                started: finished.spans().len(),
            },
            context: RawTransactionContext {
                response: transaction.response.clone(),
                user: transaction.user.clone(),
                tags: transaction.tags.clone(),
            },
            sampled: true,
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct RawSpan {
    id: String,
    transaction_id: String,
    parent_id: String,
    trace_id: String,
    name: String,
    r#type: String,
    subtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    context: SpanContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    stacktrace: Option<Vec<StackFrame>>,
    /// Microseconds since the epoch.
    timestamp: i64,
    /// Microseconds from the transaction start.
    start: f64,
    /// Milliseconds.
    duration: f64,
}

impl RawSpan {
    pub fn from_span(span: &Span) -> RawSpan {
        RawSpan {
            id: span.id().to_string(),
            transaction_id: span.transaction_id().to_string(),
            parent_id: span.transaction_id().to_string(),
            trace_id: span.trace_id().to_string(),
            name: span.name().to_string(),
            r#type: span.r#type().to_string(),
            subtype: span.subtype().to_string(),
            action: span.action().map(str::to_string),
            context: span.context().clone(),
            stacktrace: span.stacktrace().map(<[StackFrame]>::to_vec),
            timestamp: to_epoch_micros(span.timestamp()),
            start: span.start_us(),
            duration: span.duration_ms(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Event<'a> {
    Metadata(&'a RawMetadata),
    Transaction(RawTransaction),
    Span(RawSpan),
}

/// Newline-delimited JSON: the metadata line, then every transaction
/// followed by its spans.
pub fn encode_events(
    metadata: &RawMetadata,
    batch: &[FinishedTransaction],
) -> Result<String, serde_json::Error> {
    let mut payload = serde_json::to_string(&Event::Metadata(metadata))?;
    payload.push('\n');
    for finished in batch {
        payload.push_str(&serde_json::to_string(&Event::Transaction(
            RawTransaction::from_transaction(finished),
        ))?);
        payload.push('\n');
        for span in finished.spans() {
            payload.push_str(&serde_json::to_string(&Event::Span(RawSpan::from_span(span)))?);
            payload.push('\n');
        }
    }
    Ok(payload)
}

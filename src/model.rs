use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Key of the placeholder entry used when a span carries no context.
pub const NO_CONTEXT: &str = "no-context";

pub type SpanContext = BTreeMap<String, Value>;

/// Context that is never empty: the `{"no-context": {}}` sentinel.
pub fn empty_span_context() -> SpanContext {
    let mut context = SpanContext::new();
    context.insert(NO_CONTEXT.to_string(), Value::Object(Default::default()));
    context
}

pub(crate) fn new_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

fn new_trace_id() -> String {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseContext {
    pub finished: bool,
    pub headers_sent: bool,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserContext {
    pub id: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub ip: String,
    #[serde(rename = "user-agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionMeta {
    pub result: u16,
    pub r#type: String,
}

impl TransactionMeta {
    pub fn http(status_code: u16) -> Self {
        TransactionMeta {
            result: status_code,
            r#type: "HTTP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    pub filename: String,
    #[serde(default)]
    pub lineno: Option<u32>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
}

/// Root of one request's trace. Mutable until [`Transaction::stop`].
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pub trace_id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub response: Option<ResponseContext>,
    pub user: Option<UserContext>,
    pub meta: Option<TransactionMeta>,
    pub tags: HashMap<String, String>,
    spans: Vec<Span>,
}

impl Transaction {
    pub fn start(name: String) -> Self {
        Transaction {
            id: new_id(),
            trace_id: new_trace_id(),
            name,
            timestamp: Utc::now(),
            response: None,
            user: None,
            meta: None,
            tags: HashMap::new(),
            spans: vec![],
        }
    }

    pub fn set_response(&mut self, response: ResponseContext) {
        self.response = Some(response);
    }

    pub fn set_user_context(&mut self, user: UserContext) {
        self.user = Some(user);
    }

    pub fn set_meta(&mut self, meta: TransactionMeta) {
        self.meta = Some(meta);
    }

    pub fn set_transaction_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn set_tags(&mut self, tags: HashMap<String, String>) {
        self.tags.extend(tags);
    }

    /// Attach a span built for this transaction.
    pub fn put_event(&mut self, span: Span) {
        debug_assert_eq!(span.transaction_id, self.id);
        self.spans.push(span);
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Record the final elapsed time (ms). Consumes the transaction.
    pub fn stop(self, duration_ms: f64) -> FinishedTransaction {
        FinishedTransaction {
            transaction: self,
            duration_ms,
        }
    }
}

/// A stopped transaction; read-only from here on.
#[derive(Debug, Clone)]
pub struct FinishedTransaction {
    transaction: Transaction,
    duration_ms: f64,
}

impl FinishedTransaction {
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn name(&self) -> &str {
        &self.transaction.name
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn spans(&self) -> &[Span] {
        self.transaction.spans()
    }
}

/// One sub-operation of a transaction: a query, an external call, ...
///
/// `duration` is in milliseconds, `start` is an offset in microseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    id: String,
    transaction_id: String,
    trace_id: String,
    transaction_timestamp: DateTime<Utc>,
    name: String,
    r#type: String,
    subtype: String,
    action: Option<String>,
    context: SpanContext,
    stacktrace: Option<Vec<StackFrame>>,
    timestamp: Option<DateTime<Utc>>,
    start: f64,
    duration: f64,
}

impl Span {
    pub fn new(name: String, transaction: &Transaction) -> Self {
        Span {
            id: new_id(),
            transaction_id: transaction.id.clone(),
            trace_id: transaction.trace_id.clone(),
            transaction_timestamp: transaction.timestamp,
            name,
            r#type: String::new(),
            subtype: String::new(),
            action: None,
            context: empty_span_context(),
            stacktrace: None,
            timestamp: None,
            start: 0f64,
            duration: 0f64,
        }
    }

    pub fn set_type(&mut self, r#type: String) {
        self.r#type = r#type;
    }

    pub fn set_subtype(&mut self, subtype: String) {
        self.subtype = subtype;
    }

    pub fn set_action(&mut self, action: String) {
        self.action = Some(action);
    }

    /// An empty context is replaced by the `no-context` sentinel.
    pub fn set_context(&mut self, context: SpanContext) {
        self.context = if context.is_empty() {
            empty_span_context()
        } else {
            context
        };
    }

    pub fn set_stacktrace(&mut self, stacktrace: Vec<StackFrame>) {
        self.stacktrace = Some(stacktrace);
    }

    /// Stamp the wall clock and derive the offset from the transaction start.
    pub fn start(&mut self) {
        let now = Utc::now();
        self.start = now
            .signed_duration_since(self.transaction_timestamp)
            .num_microseconds()
            .unwrap_or(0) as f64;
        self.timestamp = Some(now);
    }

    pub fn stop(&mut self, duration_ms: f64) {
        self.duration = duration_ms;
    }

    /// Overwrite the offset; the wall-clock timestamp follows it.
    pub fn set_start(&mut self, start_us: f64) {
        self.start = start_us;
        self.timestamp =
            Some(self.transaction_timestamp + Duration::microseconds(start_us.round() as i64));
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn r#type(&self) -> &str {
        &self.r#type
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    pub fn stacktrace(&self) -> Option<&[StackFrame]> {
        self.stacktrace.as_deref()
    }

    /// Wall-clock start; falls back to the transaction start if never started.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or(self.transaction_timestamp)
    }

    /// Offset from the transaction start, in microseconds.
    pub fn start_us(&self) -> f64 {
        self.start
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_span_belongs_to_transaction() {
        let transaction = Transaction::start("GET /".to_string());
        let span = Span::new("SELECT".to_string(), &transaction);

        assert_eq!(span.transaction_id(), transaction.id);
        assert_eq!(span.trace_id(), transaction.trace_id);
        assert_ne!(span.id(), transaction.id);
    }

    #[test]
    fn test_empty_context_becomes_sentinel() {
        let transaction = Transaction::start("GET /".to_string());
        let mut span = Span::new("SELECT".to_string(), &transaction);
        span.set_context(SpanContext::new());

        assert_eq!(span.context().len(), 1);
        assert_eq!(span.context()[NO_CONTEXT], json!({}));
    }

    #[test]
    fn test_stop_then_set_start_keeps_recorded_values() {
        let transaction = Transaction::start("GET /".to_string());
        let mut span = Span::new("SELECT".to_string(), &transaction);
        span.start();
        span.stop(12.5);
        span.set_start(340f64);

        assert_eq!(span.duration_ms(), 12.5);
        assert_eq!(span.start_us(), 340f64);
        assert_eq!(
            span.timestamp(),
            transaction.timestamp + Duration::microseconds(340)
        );
    }

    #[test]
    fn test_stop_freezes_duration() {
        let mut transaction = Transaction::start("GET /users".to_string());
        transaction.set_transaction_name("GET //users".to_string());
        let span = Span::new("fetch".to_string(), &transaction);
        transaction.put_event(span);

        let finished = transaction.stop(42f64);
        assert_eq!(finished.name(), "GET //users");
        assert_eq!(finished.duration_ms(), 42f64);
        assert_eq!(finished.spans().len(), 1);
    }
}

use crate::model::{Span, SpanContext, StackFrame, Transaction};
use serde::Deserialize;
use serde_json::Value;

/// Raw description of a sub-operation, as left behind by instrumented code.
///
/// Every field is optional; [`build_span`] applies the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpanRecord {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub r#type: Option<String>,
    pub subtype: Option<String>,
    pub context: Option<SpanContext>,
    pub action: Option<String>,
    pub stacktrace: Option<Vec<StackFrame>>,
    /// Milliseconds.
    pub duration: Option<f64>,
    /// Microseconds from the start of the request.
    pub start: Option<f64>,
}

impl SpanRecord {
    pub fn new<S: Into<String>>(name: S) -> Self {
        SpanRecord {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_type<S: Into<String>>(mut self, r#type: S) -> Self {
        self.r#type = Some(r#type.into());
        self
    }

    pub fn with_subtype<S: Into<String>>(mut self, subtype: S) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn with_action<S: Into<String>>(mut self, action: S) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_context<S: Into<String>>(mut self, key: S, value: Value) -> Self {
        self.context
            .get_or_insert_with(SpanContext::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_stacktrace(mut self, stacktrace: Vec<StackFrame>) -> Self {
        self.stacktrace = Some(stacktrace);
        self
    }

    pub fn with_duration(mut self, duration_ms: f64) -> Self {
        self.duration = Some(duration_ms);
        self
    }

    pub fn with_start(mut self, start_us: f64) -> Self {
        self.start = Some(start_us);
        self
    }
}

/// Turn a record into a span owned by `transaction`'s trace.
///
/// The span is started, stopped with the recorded duration and then has its
/// start offset overwritten with the recorded one.
pub fn build_span(record: SpanRecord, transaction: &Transaction) -> Span {
    let mut span = Span::new(record.name.unwrap_or_default(), transaction);

    span.set_type(record.r#type.unwrap_or_default());
    span.set_subtype(record.subtype.unwrap_or_default());
    // set_context falls back to the no-context sentinel
    span.set_context(record.context.unwrap_or_default());

    if let Some(action) = record.action {
        span.set_action(action);
    }
    if let Some(stacktrace) = record.stacktrace {
        span.set_stacktrace(stacktrace);
    }

    span.start();
    span.stop(record.duration.unwrap_or(0f64));
    span.set_start(record.start.unwrap_or(0f64));
    span
}

use crate::{
    buffer::SpanBuffer,
    client::{Agent, Config, TransactionsConfig},
    context::RequestContext,
    http::{RequestInfo, ResponseInfo},
    model::{ResponseContext, Transaction, TransactionMeta, UserContext},
    naming::TransactionNameResolver,
    spans::build_span,
    timer::Timer,
};
use log::{debug, error, trace, warn};
use std::{
    any::Any,
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

pub const REQUESTED_BY_HEADER: &str = "X-Requested-By";
pub const REQUESTED_WITH_HEADER: &str = "X-Requested-With";
pub const REQUESTED_BY_TAG: &str = "requested_by";
pub const DEFAULT_REQUESTED_BY: &str = "end-user";
pub const AJAX_REQUESTED_BY: &str = "end-user-ajax";

/// Where a request's transaction is in its lifecycle. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecorderState {
    NotStarted,
    Started,
    ResponseReceived,
    Enriched,
    SpansAttached,
    NameFinalized,
    Stopped,
}

/// `X-Requested-By`, else `end-user`; plain end users on an
/// `XMLHttpRequest` become `end-user-ajax`.
pub fn requested_by<R: RequestInfo + ?Sized>(request: &R) -> String {
    let requested_by = request.header_or(REQUESTED_BY_HEADER, DEFAULT_REQUESTED_BY);
    let ajax = request.headers().get(REQUESTED_WITH_HEADER) == Some("XMLHttpRequest");
    if ajax && requested_by == DEFAULT_REQUESTED_BY {
        AJAX_REQUESTED_BY.to_string()
    } else {
        requested_by.to_string()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string payload>"
    }
}

/// Records the transaction of a single request.
pub struct TransactionRecorder<'a> {
    agent: &'a dyn Agent,
    names: TransactionNameResolver,
    timer: Timer,
    transaction: Option<Transaction>,
    state: RecorderState,
}

impl<'a> TransactionRecorder<'a> {
    pub fn new(agent: &'a dyn Agent, config: TransactionsConfig, timer: Timer) -> Self {
        TransactionRecorder {
            agent,
            names: TransactionNameResolver::new(config),
            timer,
            transaction: None,
            state: RecorderState::NotStarted,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    fn advance(&mut self, to: RecorderState) -> Option<&mut Transaction> {
        if to <= self.state {
            warn!(
                "Ignoring transaction step {:?}, already at {:?}",
                to, self.state
            );
            return None;
        }
        let transaction = self.transaction.as_mut()?;
        self.state = to;
        Some(transaction)
    }

    pub fn start<R: RequestInfo + ?Sized>(&mut self, request: &R) {
        if self.state != RecorderState::NotStarted {
            warn!("Transaction already started");
            return;
        }
        let name = self.names.initial_name(request);
        trace!("Starting transaction {}", name);
        self.transaction = Some(Transaction::start(name));
        self.state = RecorderState::Started;
    }

    pub fn set_response<S: ResponseInfo + ?Sized>(&mut self, response: &S) {
        if let Some(transaction) = self.advance(RecorderState::ResponseReceived) {
            transaction.set_response(ResponseContext {
                finished: true,
                headers_sent: true,
                status_code: response.status_code(),
                headers: response.headers().first_values(),
            });
        }
    }

    /// User identity, client address and `{result, type}` meta.
    pub fn enrich<R: RequestInfo + ?Sized>(&mut self, request: &R, status_code: u16) {
        if let Some(transaction) = self.advance(RecorderState::Enriched) {
            let principal = request.principal();
            transaction.set_user_context(UserContext {
                id: principal.and_then(|p| p.id.clone()),
                email: principal.and_then(|p| p.email.clone()),
                username: principal.and_then(|p| p.username.clone()),
                ip: request.client_ip().to_string(),
                user_agent: request.user_agent().to_string(),
            });
            transaction.set_meta(TransactionMeta::http(status_code));
        }
    }

    /// Drain the buffer once and turn every record into a span.
    pub fn attach_spans(&mut self, buffer: &SpanBuffer) {
        if let Some(transaction) = self.advance(RecorderState::SpansAttached) {
            for record in buffer.drain() {
                let span = build_span(record, transaction);
                transaction.put_event(span);
            }
            trace!(
                "Attached {} span(s) to {}",
                transaction.spans().len(),
                transaction.name
            );
        }
    }

    /// Route-URI naming and the `requested_by` tag.
    pub fn finalize_name<R: RequestInfo + ?Sized>(&mut self, request: &R) {
        let final_name = self.names.final_name(request);
        if let Some(transaction) = self.advance(RecorderState::NameFinalized) {
            if let Some(name) = final_name {
                transaction.set_transaction_name(name);
            }
            let mut tags = HashMap::new();
            tags.insert(REQUESTED_BY_TAG.to_string(), requested_by(request));
            transaction.set_tags(tags);
        }
    }

    /// Stop with the timer's elapsed ms and hand the transaction to the agent.
    pub fn stop(&mut self) {
        if self.state == RecorderState::Stopped {
            warn!("Transaction already stopped");
            return;
        }
        if let Some(transaction) = self.transaction.take() {
            let finished = transaction.stop(self.timer.elapsed_ms());
            debug!(
                "Recorded transaction {} in {:.3}ms with {} span(s)",
                finished.name(),
                finished.duration_ms(),
                finished.spans().len()
            );
            self.agent.put_transaction(finished);
            self.state = RecorderState::Stopped;
        }
    }
}

/// Middleware wrapping each request in a transaction.
#[derive(Clone)]
pub struct RecordTransaction {
    agent: Arc<dyn Agent>,
    config: Config,
}

impl RecordTransaction {
    pub fn new(agent: Arc<dyn Agent>, config: Config) -> Self {
        RecordTransaction { agent, config }
    }

    /// Run `next` inside a transaction and return its response untouched.
    ///
    /// An error from `next` is passed through as is; the transaction is
    /// then dropped without being exported.
    pub fn handle<R, S, E, F>(&self, request: &R, ctx: &RequestContext, next: F) -> Result<S, E>
    where
        R: RequestInfo + ?Sized,
        S: ResponseInfo,
        F: FnOnce(&R) -> Result<S, E>,
    {
        if !self.config.active {
            return next(request);
        }

        let mut recorder =
            TransactionRecorder::new(self.agent.as_ref(), self.config.transactions, *ctx.timer());
        recorder.start(request);

        let response = match next(request) {
            Ok(response) => response,
            Err(err) => {
                if let Some(transaction) = recorder.transaction() {
                    debug!(
                        "Downstream failed, dropping transaction {}",
                        transaction.name
                    );
                }
                return Err(err);
            }
        };

        recorder.set_response(&response);
        recorder.enrich(request, response.status_code());
        recorder.attach_spans(ctx.spans());
        recorder.finalize_name(request);
        recorder.stop();

        Ok(response)
    }

    /// Flush to the collector once the response went out. Never fails.
    pub fn terminate(&self) {
        if !self.config.active {
            return;
        }
        match catch_unwind(AssertUnwindSafe(|| self.agent.send())) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("RecordTransaction::terminate - {}: {}", err.kind(), err),
            Err(payload) => error!(
                "RecordTransaction::terminate - panic: {}",
                panic_message(payload.as_ref())
            ),
        }
    }
}

//! Per-request transaction recording for Elastic APM-compatible collectors.
//!
//! [`RecordTransaction`] wraps a request handler: it starts a transaction,
//! lets the handler run, attaches response, user and tag context plus every
//! span buffered in the [`RequestContext`], and stops the transaction. After
//! the response went out, [`RecordTransaction::terminate`] hands the finished
//! transactions to the [`Agent`], swallowing any export failure.

pub mod api;
pub mod buffer;
pub mod client;
pub mod context;
pub mod error;
pub mod http;
pub mod model;
pub mod naming;
pub mod recorder;
pub mod spans;
pub mod timer;

pub use crate::{
    buffer::SpanBuffer,
    client::{Agent, ApmAgent, Config, HttpTransport, TransactionsConfig, Transport},
    context::RequestContext,
    error::{ConfigError, ExportError},
    http::{Headers, Principal, Request, RequestInfo, Response, ResponseInfo},
    model::{FinishedTransaction, Span, StackFrame, Transaction},
    naming::TransactionNameResolver,
    recorder::{RecordTransaction, RecorderState, TransactionRecorder},
    spans::{build_span, SpanRecord},
    timer::Timer,
};

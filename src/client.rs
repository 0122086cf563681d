use crate::{
    api::{encode_events, RawMetadata},
    error::{ConfigError, ExportError},
    model::FinishedTransaction,
};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, trace, warn};
use std::{
    mem,
    sync::{Mutex, PoisonError},
    thread::JoinHandle,
    time::Duration,
};

/// Configuration settings for the agent and the middleware.
#[derive(Clone, Debug)]
pub struct Config {
    /// Record transactions at all. When off, requests pass straight through.
    pub active: bool,
    /// APM service name
    pub service: String,
    /// APM environment
    pub env: Option<String>,
    /// Collector base URL, defaults to `http://localhost:8200`.
    pub server_url: String,
    /// Sent as a bearer token when set.
    pub secret_token: Option<String>,
    /// Timeout of one POST to the collector.
    pub timeout: Duration,
    /// Batches that may wait for the export worker before `send` fails.
    pub queue_capacity: usize,
    pub transactions: TransactionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            active: true,
            service: "".to_string(),
            env: None,
            server_url: "http://localhost:8200".to_string(),
            secret_token: None,
            timeout: Duration::from_secs(10),
            queue_capacity: 64,
            transactions: TransactionsConfig::default(),
        }
    }
}

/// How transaction names are derived.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TransactionsConfig {
    /// Rename the transaction to `"{METHOD} /{route}"` after the response.
    pub use_route_uri: bool,
    /// With `use_route_uri`, also replace numeric path segments by `N`.
    pub normalize_uri: bool,
}

impl Config {
    /// Defaults overlaid with the `APM_*` process environment variables.
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(v) = lookup("APM_ACTIVE") {
            config.active = parse_bool("APM_ACTIVE", v)?;
        }
        if let Some(v) = lookup("APM_APPNAME") {
            config.service = v;
        }
        if let Some(v) = lookup("APM_ENVIRONMENT") {
            config.env = Some(v).filter(|v| !v.is_empty());
        }
        if let Some(v) = lookup("APM_SERVERURL") {
            config.server_url = v;
        }
        if let Some(v) = lookup("APM_SECRETTOKEN") {
            config.secret_token = Some(v).filter(|v| !v.is_empty());
        }
        if let Some(v) = lookup("APM_TIMEOUT") {
            let secs = v.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: "APM_TIMEOUT",
                value: v.clone(),
                expected: "whole seconds",
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("APM_QUEUECAPACITY") {
            config.queue_capacity = v
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "APM_QUEUECAPACITY",
                    value: v.clone(),
                    expected: "a positive integer",
                })?;
        }
        if let Some(v) = lookup("APM_USEROUTEURI") {
            config.transactions.use_route_uri = parse_bool("APM_USEROUTEURI", v)?;
        }
        if let Some(v) = lookup("APM_NORMALIZEURI") {
            config.transactions.normalize_uri = parse_bool("APM_NORMALIZEURI", v)?;
        }

        Ok(config)
    }
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            expected: "a boolean",
        }),
    }
}

/// Receives finished transactions and ships them to the collector.
pub trait Agent: Send + Sync {
    /// Take ownership of a stopped transaction until the next `send`.
    fn put_transaction(&self, transaction: FinishedTransaction);

    /// Flush everything put so far. Must not block on the collector.
    fn send(&self) -> Result<(), ExportError>;
}

/// Delivers one encoded payload to the collector.
pub trait Transport: Send + 'static {
    fn send(&self, payload: String) -> Result<(), ExportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    endpoint: String,
    secret_token: Option<String>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &Config) -> HttpTransport {
        HttpTransport {
            endpoint: format!(
                "{}/intake/v2/events",
                config.server_url.trim_end_matches('/')
            ),
            secret_token: config.secret_token.clone(),
            timeout: config.timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    fn send(&self, payload: String) -> Result<(), ExportError> {
        trace!("Sending to collector payload: {:?}", payload);

        let mut req = attohttpc::post(&self.endpoint)
            .timeout(self.timeout)
            .bytes(payload.into_bytes())
            .header("Content-Type", "application/x-ndjson");
        if let Some(ref token) = self.secret_token {
            req = req.try_header("Authorization", format!("Bearer {}", token))?;
        }

        let resp = req.send()?;
        if resp.is_success() {
            trace!("Sent to collector: {:?}", resp.status());
            Ok(())
        } else {
            Err(ExportError::Status(resp.status().as_u16()))
        }
    }
}

fn export_loop<T: Transport>(
    transport: T,
    metadata: RawMetadata,
    receiver: Receiver<Vec<FinishedTransaction>>,
) {
    while let Ok(batch) = receiver.recv() {
        let result = encode_events(&metadata, &batch)
            .map_err(ExportError::from)
            .and_then(|payload| transport.send(payload));
        match result {
            Ok(()) => debug!("Exported {} transaction(s)", batch.len()),
            Err(err) => error!(
                "error sending {} transaction(s) to collector: {}",
                batch.len(),
                err
            ),
        }
    }
    debug!("Export channel disconnected, exiting");
}

/// Process-wide [`Agent`]: stages finished transactions and exports them
/// from a background thread.
///
/// Dropping the agent sends what is still pending and waits for the worker
/// to drain the queue.
pub struct ApmAgent {
    pending: Mutex<Vec<FinishedTransaction>>,
    sender: Option<Sender<Vec<FinishedTransaction>>>,
    worker: Option<JoinHandle<()>>,
}

impl ApmAgent {
    pub fn new(config: &Config) -> ApmAgent {
        ApmAgent::with_transport(config, HttpTransport::new(config))
    }

    pub fn with_transport<T: Transport>(config: &Config, transport: T) -> ApmAgent {
        let (sender, receiver) = bounded(config.queue_capacity.max(1));
        let metadata = RawMetadata::new(&config.service, &config.env);

        let worker = std::thread::spawn(move || {
            export_loop(transport, metadata, receiver);
        });

        ApmAgent {
            pending: Mutex::new(Vec::new()),
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Number of transactions put but not yet sent.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Send what is still pending, then wait for the worker to drain the queue.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Err(err) = self.send() {
            warn!("Dropping transactions on shutdown: {}", err);
        }
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Export worker panicked");
            }
        }
    }
}

impl Drop for ApmAgent {
    fn drop(&mut self) {
        self.close();
    }
}

impl Agent for ApmAgent {
    fn put_transaction(&self, transaction: FinishedTransaction) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transaction);
    }

    fn send(&self) -> Result<(), ExportError> {
        let batch = mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if batch.is_empty() {
            return Ok(());
        }
        let dropped = batch.len();
        let sender = match self.sender {
            Some(ref sender) => sender,
            None => return Err(ExportError::Disconnected { dropped }),
        };
        sender.try_send(batch).map_err(|err| match err {
            TrySendError::Full(_) => ExportError::QueueFull { dropped },
            TrySendError::Disconnected(_) => ExportError::Disconnected { dropped },
        })
    }
}

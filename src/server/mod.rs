//! HTTP server for the relay.
//!
//! # Endpoints
//!
//! - `GET /healthz` - liveness
//! - `POST /event/{parser}` - ingest a webhook through the named parser
//! - `GET|PUT /users/{key}/preferences` - read or replace a user's preferences
//! - `GET /configuration` - registered sources and transports
//!
//! [`Options`] collects the components; [`Server::new`] checks them,
//! [`Server::validate`] runs every component's startup self-check and
//! [`Server::run`] serves until the cancellation token fires.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod configuration;
pub mod event;
pub mod health;
pub mod preferences;

pub use configuration::configuration_handler;
pub use event::event_handler;
pub use health::health_handler;
pub use preferences::{get_preferences, put_preferences};

use crate::dispatch::Notifier;
use crate::event::parser::Parser;
use crate::preference::{ChainProvider, DefaultProvider, Provider, UserProvider};
use crate::processor::Processor;
use crate::transport::{Transport, TransportKey};
use crate::user::{MemoryStore, UserStore};
use crate::validate::{Validate, ValidationError};

/// How long in-flight requests may run after shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default bind address.
pub const DEFAULT_LISTEN_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
    3000,
);

/// Invalid server options.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one transport is required")]
    NoTransports,

    #[error("transport {0} is registered twice")]
    DuplicateTransport(TransportKey),

    #[error("parser {0:?} is registered twice")]
    DuplicateParser(String),

    #[error("invalid parser key {0:?}: use lowercase letters, digits, '-' and '_'")]
    InvalidParserKey(String),
}

/// Failure to start or keep serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("server task failed: {0}")]
    Task(String),
}

/// Everything the server is built from.
pub struct Options {
    listen_addr: SocketAddr,
    parsers: Vec<(String, Arc<dyn Parser>)>,
    processors: Vec<Arc<dyn Processor>>,
    transports: Vec<Arc<dyn Transport>>,
    store: Option<Arc<dyn UserStore>>,
    default_preference: Option<Arc<dyn Provider>>,
    router: Option<Router>,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("listen_addr", &self.listen_addr)
            .finish_non_exhaustive()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl Options {
    /// Options with no components, listening on [`DEFAULT_LISTEN_ADDR`].
    pub fn new() -> Self {
        Options {
            listen_addr: DEFAULT_LISTEN_ADDR,
            parsers: Vec::new(),
            processors: Vec::new(),
            transports: Vec::new(),
            store: None,
            default_preference: None,
            router: None,
        }
    }

    /// Sets the address [`Server::run`] binds.
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Serves `parser` at `/event/{key}`.
    pub fn with_parser(mut self, key: impl Into<String>, parser: Arc<dyn Parser>) -> Self {
        self.parsers.push((key.into(), parser));
        self
    }

    /// Appends a processor; processors run in the order added.
    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Appends a transport; transports are tried in the order added.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Defaults to an empty [`MemoryStore`].
    pub fn with_store(mut self, store: Arc<dyn UserStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Used when the user has no stored opinion. Defaults to delivering.
    pub fn with_default_preference(mut self, provider: Arc<dyn Provider>) -> Self {
        self.default_preference = Some(provider);
        self
    }

    /// Extra routes merged into the server's router.
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }
}

fn valid_parser_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Shared application state.
///
/// Passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    parsers: BTreeMap<String, Arc<dyn Parser>>,
    processors: Vec<Arc<dyn Processor>>,
    notifier: Notifier,
    store: Arc<dyn UserStore>,
    default_preference: Arc<dyn Provider>,
    /// Parent of every request's token; cancelled when draining times out.
    requests: CancellationToken,
}

impl AppState {
    /// The parser serving `/event/<key>`.
    pub fn parser(&self, key: &str) -> Option<&Arc<dyn Parser>> {
        self.inner.parsers.get(key)
    }

    /// Parsers in key order.
    pub fn parsers(&self) -> &BTreeMap<String, Arc<dyn Parser>> {
        &self.inner.parsers
    }

    /// The processor chain, in order.
    pub fn processors(&self) -> &[Arc<dyn Processor>] {
        &self.inner.processors
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// The user store backing enrichment and preferences.
    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.inner.store
    }

    /// Answers for users with no stored preference.
    pub fn default_preference(&self) -> &dyn Provider {
        self.inner.default_preference.as_ref()
    }

    /// A fresh token for one request.
    pub fn request_token(&self) -> CancellationToken {
        self.inner.requests.child_token()
    }

    /// Every event type any parser can produce, sorted and deduplicated.
    pub fn event_types(&self) -> Vec<String> {
        self.inner
            .parsers
            .values()
            .flat_map(|p| p.event_types())
            .map(|t| t.key)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Keys of every transport, in dispatch order.
    pub fn transport_keys(&self) -> Vec<TransportKey> {
        self.inner
            .notifier
            .transports()
            .iter()
            .map(|t| t.key())
            .collect()
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> Router {
    use axum::routing::{get, post};

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/event/{parser}", post(event_handler))
        .route(
            "/users/{key}/preferences",
            get(get_preferences).put(put_preferences),
        )
        .route("/configuration", get(configuration_handler))
        .with_state(app_state)
}

/// A configured relay server.
pub struct Server {
    listen_addr: SocketAddr,
    state: AppState,
    extra: Option<Router>,
}

impl Server {
    /// Checks `options` and wires the components together.
    pub fn new(options: Options) -> Result<Self, ConfigError> {
        if options.transports.is_empty() {
            return Err(ConfigError::NoTransports);
        }
        let mut seen = BTreeSet::new();
        for transport in &options.transports {
            let key = transport.key();
            if !seen.insert(key.clone()) {
                return Err(ConfigError::DuplicateTransport(key));
            }
        }

        let mut parsers = BTreeMap::new();
        for (key, parser) in options.parsers {
            if !valid_parser_key(&key) {
                return Err(ConfigError::InvalidParserKey(key));
            }
            if parsers.contains_key(&key) {
                return Err(ConfigError::DuplicateParser(key));
            }
            parsers.insert(key, parser);
        }

        let store = options
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let default_preference = options
            .default_preference
            .unwrap_or_else(|| Arc::new(DefaultProvider(true)));
        let preferences = ChainProvider::new(vec![
            Arc::new(UserProvider::new(Arc::clone(&store))),
            Arc::clone(&default_preference),
        ]);

        Ok(Server {
            listen_addr: options.listen_addr,
            state: AppState {
                inner: Arc::new(AppStateInner {
                    parsers,
                    processors: options.processors,
                    notifier: Notifier::new(options.transports, Arc::new(preferences)),
                    store,
                    default_preference,
                    requests: CancellationToken::new(),
                }),
            },
            extra: options.router,
        })
    }

    /// Shared state handed to every handler.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// The full router, including any extra routes from [`Options::with_router`].
    pub fn router(&self) -> Router {
        let router = build_router(self.state.clone());
        match &self.extra {
            Some(extra) => router.merge(extra.clone()),
            None => router,
        }
    }

    /// Runs every registered component's startup check. The first failure
    /// wins.
    pub async fn validate(&self, cancel: &CancellationToken) -> Result<(), ValidationError> {
        let state = &self.state;
        let mut validators: Vec<(String, &dyn Validate)> = Vec::new();
        for (key, parser) in state.parsers() {
            if let Some(v) = parser.validator() {
                validators.push((format!("parser {key}"), v));
            }
        }
        for processor in state.processors() {
            if let Some(v) = processor.validator() {
                validators.push((format!("processor {}", processor.name()), v));
            }
        }
        for transport in state.notifier().transports() {
            if let Some(v) = transport.validator() {
                validators.push((format!("transport {}", transport.key()), v));
            }
        }
        if let Some(v) = state.store().validator() {
            validators.push(("user store".to_string(), v));
        }
        if let Some(v) = state.default_preference().validator() {
            validators.push(("default preference".to_string(), v));
        }

        for (component, validator) in validators {
            debug!(component = %component, "Validating");
            validator.validate(cancel).await?;
        }
        Ok(())
    }

    /// Validates, binds the listen address and serves until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ServerError> {
        self.validate(&cancel).await?;
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.listen_addr,
                source,
            })?;
        self.serve(listener, cancel).await
    }

    /// Serves on an already-bound listener until `cancel` fires.
    ///
    /// Shutdown stops accepting connections, then gives in-flight requests
    /// [`SHUTDOWN_GRACE`] to finish before cancelling them.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Listening");
        }

        let app = self.router();
        let stop = cancel.clone();
        let mut task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        });

        tokio::select! {
            result = &mut task => return flatten(result),
            _ = cancel.cancelled() => {}
        }

        info!("Shutting down, draining in-flight requests");
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(result) => flatten(result),
            Err(_) => {
                warn!(
                    grace_secs = SHUTDOWN_GRACE.as_secs(),
                    "Grace period elapsed, aborting in-flight requests"
                );
                self.state.inner.requests.cancel();
                task.abort();
                Ok(())
            }
        }
    }
}

fn flatten(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), ServerError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServerError::Serve(e)),
        Err(e) => Err(ServerError::Task(e.to_string())),
    }
}

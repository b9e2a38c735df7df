//! Command-line and environment configuration for the `hook-relay` binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use thiserror::Error;
use tracing::{Level, info};

use crate::identifier::InvalidIdentifier;
use crate::preference::DefaultProvider;
use crate::processor::{Deduplicate, DropUnaddressed, Enrich, RouteUnaddressed};
use crate::server::Options;
use crate::sources::{EXAMPLE_KEY, ExampleParser, ForgeGenerator, MessageGenerator};
use crate::transport::retry::{Backoff, RetryConfig};
use crate::transport::slack::DEFAULT_API_URL;
use crate::transport::{BlackholeTransport, SlackTransport, TransportBuilder, WriterTransport};
use crate::user::{MemoryStore, SqliteStore, User, UserError, UserStore};
use crate::webhooks::{GitHubHook, GitLabHook, HookParser};

/// Label of the blackhole identifier given to unaddressed notifications.
pub const UNADDRESSED_LABEL: &str = "unaddressed";

/// Relays webhooks from forges and other tools to per-user notifications.
#[derive(Parser, Debug, Clone)]
#[command(name = "hook-relay", version, about, long_about = None)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "HOOK_RELAY_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// SQLite user database; users are kept in memory when absent
    #[arg(long, env = "HOOK_RELAY_DATABASE")]
    pub database: Option<PathBuf>,

    /// JSON array of users to load into the user store at startup
    #[arg(long, env = "HOOK_RELAY_USERS")]
    pub users: Option<PathBuf>,

    /// Print notifications to stdout
    #[arg(long, env = "HOOK_RELAY_WRITER")]
    pub writer: bool,

    /// Route notifications nobody is addressed by to a discard sink
    #[arg(long, env = "HOOK_RELAY_BLACKHOLE")]
    pub blackhole: bool,

    /// Slack bot token; enables the Slack transport
    #[arg(long, env = "HOOK_RELAY_SLACK_TOKEN", hide_env_values = true)]
    pub slack_token: Option<String>,

    /// Slack Web API base URL
    #[arg(long, env = "HOOK_RELAY_SLACK_API_URL", default_value = DEFAULT_API_URL)]
    pub slack_api_url: String,

    /// GitHub webhook secret; enables /event/github
    #[arg(long, env = "HOOK_RELAY_GITHUB_SECRET", hide_env_values = true)]
    pub github_secret: Option<String>,

    /// GitLab webhook token; enables /event/gitlab
    #[arg(long, env = "HOOK_RELAY_GITLAB_TOKEN", hide_env_values = true)]
    pub gitlab_token: Option<String>,

    /// Deliver when a user has no stored preference
    #[arg(
        long,
        env = "HOOK_RELAY_DEFAULT_PREFERENCE",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub default_preference: bool,

    /// Deadline for one delivery, retries included
    #[arg(long, default_value_t = 10)]
    pub transport_timeout_secs: u64,

    /// Attempts per delivery
    #[arg(long, default_value_t = 3)]
    pub transport_retries: u32,
}

/// Failure to turn a [`Config`] into server options.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to open user database: {0}")]
    Store(#[from] UserError),

    #[error("failed to read users from {path}: {source}")]
    ReadUsers {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid users file {path}: {source}")]
    ParseUsers {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to create Slack client: {0}")]
    Slack(#[from] reqwest::Error),

    #[error("invalid blackhole label: {0}")]
    Blackhole(#[from] InvalidIdentifier),
}

impl Config {
    /// Wires the configured components into server [`Options`].
    pub async fn build(&self) -> Result<Options, BuildError> {
        let store = self.open_store().await?;

        let mut options = Options::new()
            .with_listen_addr(self.listen)
            .with_store(Arc::clone(&store))
            .with_default_preference(Arc::new(DefaultProvider(self.default_preference)))
            .with_parser(EXAMPLE_KEY, Arc::new(ExampleParser));
        if let Some(secret) = &self.github_secret {
            options = options.with_parser("github", Arc::new(HookParser::new(GitHubHook::new(secret.as_bytes()))));
        }
        if let Some(token) = &self.gitlab_token {
            options = options.with_parser("gitlab", Arc::new(HookParser::new(GitLabHook::new(token.as_str()))));
        }

        options = options
            .with_processor(Arc::new(MessageGenerator))
            .with_processor(Arc::new(ForgeGenerator))
            .with_processor(Arc::new(Enrich::new(store)))
            .with_processor(Arc::new(Deduplicate));
        options = if self.blackhole {
            options.with_processor(Arc::new(RouteUnaddressed::new(UNADDRESSED_LABEL)?))
        } else {
            options.with_processor(Arc::new(DropUnaddressed))
        };

        if self.writer {
            options = options.with_transport(
                TransportBuilder::new(WriterTransport::stdout())
                    .logging(Level::DEBUG)
                    .build(),
            );
        }
        if let Some(token) = &self.slack_token {
            let slack = SlackTransport::new(token.as_str())?.with_api_url(self.slack_api_url.as_str());
            options = options.with_transport(self.decorate(TransportBuilder::new(slack)));
        }
        if self.blackhole {
            options = options.with_transport(
                TransportBuilder::new(BlackholeTransport)
                    .logging(Level::DEBUG)
                    .build(),
            );
        }
        Ok(options)
    }

    /// Opens the configured store and seeds it from `--users`, replacing
    /// stored users with the same key.
    async fn open_store(&self) -> Result<Arc<dyn UserStore>, BuildError> {
        let store: Arc<dyn UserStore> = match &self.database {
            Some(path) => {
                info!(path = %path.display(), "Using SQLite user store");
                Arc::new(SqliteStore::open(path)?)
            }
            None => Arc::new(MemoryStore::new()),
        };

        if let Some(path) = &self.users {
            let users = load_users(path)?;
            info!(path = %path.display(), count = users.len(), "Seeding users");
            for user in users {
                store.put(user).await?;
            }
        }
        Ok(store)
    }

    /// Retry inside the deadline, so the deadline bounds every attempt.
    fn decorate(&self, builder: TransportBuilder) -> Arc<dyn crate::transport::Transport> {
        builder
            .retry(RetryConfig::new(self.transport_retries, Backoff::DEFAULT))
            .timeout(Duration::from_secs(self.transport_timeout_secs))
            .logging(Level::INFO)
            .build()
    }
}

/// Reads a JSON array of [`User`] records.
fn load_users(path: &Path) -> Result<Vec<User>, BuildError> {
    let raw = std::fs::read_to_string(path).map_err(|source| BuildError::ReadUsers {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| BuildError::ParseUsers {
        path: path.to_path_buf(),
        source,
    })
}

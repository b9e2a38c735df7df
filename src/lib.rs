//! Hook Relay - turns webhooks into per-user notifications.
//!
//! A request to `/event/{parser}` is parsed into an [`event::Event`], run
//! through the [`processor`] chain to produce [`notification::Notification`]s,
//! and each notification is pushed by the [`dispatch::Notifier`] to every
//! [`transport`] the recipient's [`preference`]s allow.

pub mod config;
pub mod dispatch;
pub mod event;
pub mod identifier;
pub mod notification;
pub mod preference;
pub mod processor;
pub mod server;
pub mod sources;
pub mod transport;
pub mod user;
pub mod validate;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_utils;

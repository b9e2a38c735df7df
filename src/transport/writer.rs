//! Console transport.
//!
//! Writes one line per notification:
//!
//! ```text
//! notification: id=<id> type=<type>, to=<recipient set>, message=<message>
//! ```

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{Transport, TransportError, TransportKey};
use crate::notification::Notification;

/// Key under which the writer renders and looks up preferences.
pub const WRITER_KEY: &str = "writer";

/// Writes notifications as text lines. Never fails.
pub struct WriterTransport {
    out: Mutex<Box<dyn Write + Send>>,
}

impl WriterTransport {
    /// Writes notifications to `out`.
    pub fn new(out: impl Write + Send + 'static) -> Self {
        WriterTransport {
            out: Mutex::new(Box::new(out)),
        }
    }

    /// Writes notifications to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

/// Formats the line written for `notification`.
pub fn format_line(notification: &Notification) -> String {
    let context = notification.context();
    format!(
        "notification: id={} type={}, to={}, message={}\n",
        context.id(),
        context.event_type(),
        notification.recipient(),
        notification.render(&TransportKey::new(WRITER_KEY)),
    )
}

#[async_trait]
impl Transport for WriterTransport {
    fn key(&self) -> TransportKey {
        TransportKey::new(WRITER_KEY)
    }

    async fn push(
        &self,
        _cancel: &CancellationToken,
        notification: &Notification,
    ) -> Result<(), TransportError> {
        let line = format_line(notification);
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.write_all(line.as_bytes()).and_then(|()| out.flush()) {
            warn!(error = %e, "Failed to write notification");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{SharedBuffer, notification};

    #[tokio::test]
    async fn writes_one_line() {
        let buffer = SharedBuffer::default();
        let transport = WriterTransport::new(buffer.clone());
        let n = notification("com.example.message_sent", &["email:bob@x"]);

        transport.push(&CancellationToken::new(), &n).await.unwrap();

        assert_eq!(
            buffer.contents(),
            format!(
                "notification: id={} type=com.example.message_sent, to=[email:bob@x], message=test message\n",
                n.context().id()
            )
        );
    }

    #[tokio::test]
    async fn write_errors_are_swallowed() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let transport = WriterTransport::new(Broken);
        let n = notification("com.example.x", &[]);
        assert!(transport.push(&CancellationToken::new(), &n).await.is_ok());
    }
}

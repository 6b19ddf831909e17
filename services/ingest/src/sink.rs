use async_trait::async_trait;
use ghtap_polling::emitter::{IssueKey, IssueValue};
use ghtap_polling::OutboundEvent;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write event: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for emitted events. A successful `publish` means the event is
/// durable downstream and its offset may be recorded.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &OutboundEvent) -> Result<(), SinkError>;
}

#[derive(Serialize)]
struct SinkRecord<'a> {
    topic: &'a str,
    key: &'a IssueKey,
    value: &'a IssueValue,
    timestamp: i64,
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

pub type StdoutSink = JsonLinesSink<tokio::io::Stdout>;

impl StdoutSink {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W> EventSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, event: &OutboundEvent) -> Result<(), SinkError> {
        let record = SinkRecord {
            topic: &event.topic,
            key: &event.key,
            value: &event.value,
            timestamp: event.timestamp_ms,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        Ok(())
    }
}

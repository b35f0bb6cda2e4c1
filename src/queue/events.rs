//! Client-facing download notifications

use crate::queue::task::TaskStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Event name carried by every download notification
pub const DOWNLOAD_UPDATE_EVENT: &str = "download_update";

/// Which kind of part a notification or progress sample refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    All,
    Video,
    Caption,
}

/// Snapshot of a task pushed to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub id: String,
    pub status: TaskStatus,
    pub total: u64,
    pub finished: u64,
    pub speed: String,
    pub data_type: DataType,
    pub progress: f64,
    pub error: String,
}

impl DownloadResponse {
    pub fn new(id: impl Into<String>, status: TaskStatus, data_type: DataType) -> Self {
        Self {
            id: id.into(),
            status,
            total: 0,
            finished: 0,
            speed: String::new(),
            data_type,
            progress: 0.0,
            error: String::new(),
        }
    }

    /// Wire envelope: `{"event":"download_update","payload":{...}}`
    pub fn ws_message(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Envelope<'a> {
            event: &'static str,
            payload: &'a DownloadResponse,
        }

        serde_json::to_string(&Envelope {
            event: DOWNLOAD_UPDATE_EVENT,
            payload: self,
        })
    }
}

/// Delivers notifications to whoever is watching a task
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, response: &DownloadResponse);
}

/// [`Notifier`] that forwards every response into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<DownloadResponse>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DownloadResponse>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, response: &DownloadResponse) {
        if self.tx.send(response.clone()).is_err() {
            debug!("Notification receiver dropped for {}", response.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_message_shape() {
        let mut response = DownloadResponse::new("yt-1", TaskStatus::AllSuccess, DataType::All);
        response.total = 2;
        response.finished = 2;
        response.progress = 100.0;

        let value: serde_json::Value =
            serde_json::from_str(&response.ws_message().unwrap()).unwrap();
        assert_eq!(value["event"], "download_update");
        assert_eq!(value["payload"]["id"], "yt-1");
        assert_eq!(value["payload"]["status"], "allSuccess");
        assert_eq!(value["payload"]["dataType"], "all");
        assert_eq!(value["payload"]["total"], 2);
        assert_eq!(value["payload"]["error"], "");
    }

    #[test]
    fn test_data_type_names() {
        assert_eq!(serde_json::to_string(&DataType::Caption).unwrap(), "\"caption\"");
        assert_eq!(serde_json::to_string(&DataType::Video).unwrap(), "\"video\"");
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier
            .notify(&DownloadResponse::new("a", TaskStatus::Downloading, DataType::Video))
            .await;
        assert_eq!(rx.recv().await.unwrap().id, "a");

        drop(rx);
        // Dropped receiver is not an error for the sender
        notifier
            .notify(&DownloadResponse::new("b", TaskStatus::Muxing, DataType::Video))
            .await;
    }
}

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

#[derive(Serialize)]
struct QueryLogEntry {
    ts: String,
    #[serde(rename = "type")]
    query_type: String,
    domain: String,
    from: String,
    cached: bool,
    rcode: String,
    ms: u64,
}

/// Async query logger backed by a background writer task, so the request
/// path never blocks on file I/O.
pub struct QueryLogger {
    sender: mpsc::UnboundedSender<String>,
}

impl QueryLogger {
    /// Create a new query logger appending JSON lines to the given path.
    pub fn new(path: &str) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
        let path = PathBuf::from(path);

        tokio::spawn(async move {
            use tokio::fs::OpenOptions;
            use tokio::io::AsyncWriteExt;

            if let Some(parent) = path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }

            let mut file = match OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) => {
                    error!("failed to open query log file {}: {}", path.display(), e);
                    return;
                }
            };

            while let Some(line) = receiver.recv().await {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    error!("failed to write to query log: {}", e);
                }
            }
        });

        Self { sender }
    }

    pub fn log(
        &self,
        domain: &str,
        query_type: &str,
        source_ip: &str,
        cached: bool,
        rcode: &str,
        elapsed_ms: u64,
    ) {
        let entry = QueryLogEntry {
            ts: Utc::now().to_rfc3339(),
            query_type: query_type.to_string(),
            domain: domain.to_string(),
            from: source_ip.to_string(),
            cached,
            rcode: rcode.to_string(),
            ms: elapsed_ms,
        };

        match serde_json::to_string(&entry) {
            Ok(json) => {
                if self.sender.send(format!("{}\n", json)).is_err() {
                    debug!("query log channel closed");
                }
            }
            Err(e) => {
                debug!("failed to serialize query log entry: {}", e);
            }
        }
    }
}

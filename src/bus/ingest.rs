//! Bus ingest listener
//! TCP JSON-lines entry point for external producers (test-data producer,
//! upstream gateways). One frame per line: {"topic", "key", "value"}.
//! Frames for unknown or non-input topics are rejected and counted; the
//! connection stays up.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::{topics, InMemoryBus};

#[derive(Debug, Deserialize)]
struct IngestFrame {
    topic: String,
    key: String,
    value: Value,
}

#[derive(Debug, Default)]
pub struct IngestStats {
    pub frames_accepted: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub connections: AtomicU64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            frames_accepted: self.frames_accepted.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStatsSnapshot {
    pub frames_accepted: u64,
    pub frames_rejected: u64,
    pub connections: u64,
}

pub struct IngestServer {
    bus: Arc<InMemoryBus>,
    stats: Arc<IngestStats>,
}

impl IngestServer {
    pub fn new(bus: Arc<InMemoryBus>) -> Self {
        Self {
            bus,
            stats: Arc::new(IngestStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Bind and return the local address; the accept loop runs until the
    /// process exits.
    pub async fn bind(self, addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind ingest listener on {addr}"))?;
        let local = listener.local_addr().context("ingest local addr")?;
        info!(addr = %local, "bus ingest listening");

        let bus = self.bus;
        let stats = self.stats;
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        stats.connections.fetch_add(1, Ordering::Relaxed);
                        let bus = bus.clone();
                        let stats = stats.clone();
                        tokio::spawn(async move {
                            debug!(peer = %peer, "ingest connection open");
                            handle_connection(stream, bus, stats).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "ingest accept failed");
                    }
                }
            }
        });
        Ok(local)
    }
}

async fn handle_connection(stream: TcpStream, bus: Arc<InMemoryBus>, stats: Arc<IngestStats>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<IngestFrame>(line) {
                    Ok(frame) if topics::INPUTS.contains(&frame.topic.as_str()) => {
                        match bus.publish(&frame.topic, &frame.key, frame.value) {
                            Ok(()) => {
                                stats.frames_accepted.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
                                warn!(error = %e, "ingest publish failed");
                            }
                        }
                    }
                    Ok(frame) => {
                        stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
                        warn!(topic = %frame.topic, "ingest frame for non-input topic dropped");
                    }
                    Err(e) => {
                        stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "unparsable ingest frame dropped");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "ingest read failed, closing connection");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn frames_land_on_the_bus() {
        let bus = InMemoryBus::new();
        let mut rx = bus.subscribe(topics::TRANSACTIONS).unwrap();

        let server = IngestServer::new(bus.clone());
        let stats = server.stats();
        let addr = server.bind("127.0.0.1:0").await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let frames = concat!(
            r#"{"topic":"transactions","key":"CUST-001","value":{"n":1}}"#,
            "\n",
            "not json at all\n",
            r#"{"topic":"fraud-alerts","key":"x","value":{}}"#,
            "\n",
        );
        stream.write_all(frames.as_bytes()).await.unwrap();
        stream.flush().await.unwrap();

        let record = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(record.key, "CUST-001");

        // The garbage line and the output-topic frame were both dropped.
        assert!(rx.try_recv().is_err());
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while stats.snapshot().frames_rejected < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("rejected frames never counted");
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_accepted, 1);
        assert_eq!(snapshot.connections, 1);
    }
}

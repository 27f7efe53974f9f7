//! Node configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a single node can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Name of this node, reported in logs and by `/health`.
    /// Env: `NODE_ID`
    /// Default: `node`
    pub node_id: String,

    /// Socket address for the HTTP (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// Base URLs of every other node; writes are broadcast to each of them.
    /// Env: `PEERS` (comma separated, `host:port` gets an `http://` prefix)
    /// Default: none
    pub peers: Vec<String>,

    /// Whether this node is the single designated snapshot writer.
    /// Env: `SNAPSHOT_WRITER` (true/false)
    /// Default: `false`
    pub snapshot_writer: bool,

    /// Period between snapshots. This is also the upper bound on how long a
    /// peer can stay stale after a lost broadcast.
    /// Env: `SNAPSHOT_INTERVAL_SECS`
    /// Default: 180 seconds
    pub snapshot_interval: Duration,

    /// Base URL of the node hosting the shared counter and durable store.
    /// When unset, this node uses the file backends under `data_dir`.
    /// Env: `COORDINATOR_URL`
    pub coordinator_url: Option<String>,

    /// Expose `/coord/*` endpoints backed by `data_dir` for the other nodes.
    /// Env: `SERVE_COORDINATOR` (true/false)
    /// Default: `false`
    pub serve_coordinator: bool,

    /// Directory of the file-backed counter and snapshot blobs.
    /// Env: `DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// Snapshot writer only: write an empty snapshot when the durable store
    /// holds none yet, so a brand-new cluster can boot.
    /// Env: `SEED_EMPTY_SNAPSHOT` (true/false)
    /// Default: `false`
    pub seed_empty_snapshot: bool,

    /// Transport timeout for a single broadcast request.
    /// Env: `BROADCAST_TIMEOUT_MS`
    /// Default: 5000 ms
    pub broadcast_timeout: Duration,

    /// Timeout for one counter or snapshot-blob request to the coordinator.
    /// Covers the whole body, so it must allow a full snapshot transfer.
    /// Env: `COORDINATOR_TIMEOUT_MS`
    /// Default: 300000 ms
    pub coordinator_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node".to_string(),
            http_addr: ([0, 0, 0, 0], 5000).into(),
            peers: Vec::new(),
            snapshot_writer: false,
            snapshot_interval: Duration::from_secs(180),
            coordinator_url: None,
            serve_coordinator: false,
            data_dir: PathBuf::from("./data"),
            seed_empty_snapshot: false,
            broadcast_timeout: Duration::from_millis(5000),
            coordinator_timeout: Duration::from_secs(300),
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(id) = var("NODE_ID").filter(|s| !s.is_empty()) {
            config.node_id = id;
        }

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(peers) = var("PEERS") {
            config.peers = parse_peers(&peers);
        }

        if let Some(val) = var("SNAPSHOT_WRITER") {
            config.snapshot_writer = parse_flag(&val);
        }

        if let Some(val) = var("SNAPSHOT_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.snapshot_interval = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid SNAPSHOT_INTERVAL_SECS, using default"),
            }
        }

        if let Some(url) = var("COORDINATOR_URL").filter(|s| !s.trim().is_empty()) {
            config.coordinator_url = Some(normalize_url(&url));
        }

        if let Some(val) = var("SERVE_COORDINATOR") {
            config.serve_coordinator = parse_flag(&val);
        }

        if let Some(dir) = var("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(val) = var("SEED_EMPTY_SNAPSHOT") {
            config.seed_empty_snapshot = parse_flag(&val);
        }

        if let Some(val) = var("BROADCAST_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.broadcast_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid BROADCAST_TIMEOUT_MS, using default"),
            }
        }

        if let Some(val) = var("COORDINATOR_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.coordinator_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid COORDINATOR_TIMEOUT_MS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

impl NodeConfig {
    /// Reject settings under which IDs would not be unique cluster-wide.
    ///
    /// A node with peers must share one counter with them: either it hosts
    /// the coordinator or it points at one.
    pub fn validate(&self) -> Result<(), String> {
        if !self.peers.is_empty() && self.coordinator_url.is_none() && !self.serve_coordinator {
            return Err(
                "PEERS is set but this node neither serves nor uses a coordinator; \
                 set COORDINATOR_URL or SERVE_COORDINATOR=true"
                    .to_string(),
            );
        }
        Ok(())
    }
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}

fn parse_peers(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(normalize_url)
        .collect()
}

/// Add an `http://` scheme when missing and drop any trailing slash.
fn normalize_url(raw: &str) -> String {
    let raw = raw.trim().trim_end_matches('/');
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    }
}

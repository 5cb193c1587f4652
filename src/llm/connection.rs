//! Process-scoped HTTP handle to the inference service.
//!
//! Created lazily on the first request and reused afterwards. reqwest
//! clients pool connections internally and are safe to share across tasks,
//! so no further locking is needed once the handle exists.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;

use super::types::LlmError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct LlmConnection {
    client: OnceCell<reqwest::Client>,
    connect_timeout: Duration,
    inits: AtomicUsize,
}

impl Default for LlmConnection {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT)
    }
}

impl LlmConnection {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            client: OnceCell::new(),
            connect_timeout,
            inits: AtomicUsize::new(0),
        }
    }

    /// Wrap an already configured client (custom TLS, proxy rules).
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client: OnceCell::from(client),
            connect_timeout: CONNECT_TIMEOUT,
            inits: AtomicUsize::new(1),
        }
    }

    /// The shared client, built on first call. Concurrent first calls
    /// build it once; every caller gets the same handle.
    pub async fn handle(&self) -> Result<&reqwest::Client, LlmError> {
        self.client
            .get_or_try_init(|| async {
                let client = reqwest::Client::builder()
                    .connect_timeout(self.connect_timeout)
                    .build()
                    .map_err(|e| {
                        LlmError::ServiceUnavailable(format!("HTTP client setup failed: {}", e))
                    })?;
                self.inits.fetch_add(1, Ordering::SeqCst);
                log::info!("[LLM] Connection handle initialized");
                Ok(client)
            })
            .await
    }

    pub fn is_initialized(&self) -> bool {
        self.client.initialized()
    }

    /// How many times the handle has been built. Never more than one.
    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }
}

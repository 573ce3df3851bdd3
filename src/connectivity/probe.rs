//! Reachability probes

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::remote::RemoteBackend;

/// One-shot reachability check
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// GET against a URL; any HTTP answer below 500 counts as reachable
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: &str, timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to create probe client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                tracing::trace!("Probe of {} failed: {}", self.url, e);
                false
            }
        }
    }
}

/// Uses the backend's own ping
pub struct RemoteProbe {
    remote: Arc<dyn RemoteBackend>,
}

impl RemoteProbe {
    pub fn new(remote: Arc<dyn RemoteBackend>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl ReachabilityProbe for RemoteProbe {
    async fn probe(&self) -> bool {
        self.remote.ping().await.is_ok()
    }
}

//! Reference Data Service
//!
//! Read-through access to the datasets the device needs offline: the
//! student roster, the grade catalog and the term fee schedule.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{keys, CacheStore};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};
use crate::model::{GradeRecord, StudentRecord, TermFee};
use crate::remote::RemoteBackend;

/// Cache-first reader for reference datasets
pub struct ReferenceData {
    cache: Arc<CacheStore>,
    remote: Arc<dyn RemoteBackend>,
    connectivity: Arc<ConnectivityMonitor>,
}

impl ReferenceData {
    pub fn new(
        cache: Arc<CacheStore>,
        remote: Arc<dyn RemoteBackend>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            cache,
            remote,
            connectivity,
        }
    }

    /// Student roster
    pub async fn students(&self, force_refresh: bool) -> Result<Vec<StudentRecord>> {
        self.load(keys::STUDENTS, force_refresh, || self.remote.list_students())
            .await
    }

    /// Grade catalog
    pub async fn grades(&self, force_refresh: bool) -> Result<Vec<GradeRecord>> {
        self.load(keys::GRADES, force_refresh, || self.remote.list_grades())
            .await
    }

    /// Term fee schedule
    pub async fn term_fees(&self, force_refresh: bool) -> Result<Vec<TermFee>> {
        self.load(keys::TERM_FEES, force_refresh, || self.remote.list_term_fees())
            .await
    }

    /// Refetch every essential dataset
    pub async fn refresh_all(&self) -> Result<()> {
        self.students(true).await?;
        self.grades(true).await?;
        self.term_fees(true).await?;
        Ok(())
    }

    async fn load<T, F, Fut>(&self, key: &str, force_refresh: bool, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !force_refresh {
            if let Some(cached) = self.cache.get::<T>(key).await? {
                return Ok(cached);
            }
        }

        if !self.connectivity.is_online() {
            return match self.cache.get_stale::<T>(key).await? {
                Some(stale) => {
                    tracing::debug!("Offline: serving cached '{}'", key);
                    Ok(stale)
                }
                None => Err(Error::OfflineUnavailable(key.to_string())),
            };
        }

        match fetch().await {
            Ok(fresh) => {
                self.cache.set(key, &fresh, None, None).await?;
                Ok(fresh)
            }
            Err(e) => match self.cache.get_stale::<T>(key).await? {
                Some(stale) => {
                    tracing::warn!("Fetching '{}' failed, serving cached copy: {}", key, e);
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }
}

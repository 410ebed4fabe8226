//! In-memory registry of the websites that have the plugin installed.
//!
//! The registry is shared between the event stream task (reads) and the HTTP
//! settings handlers (reads and writes). Every access goes through one
//! `RwLock`, and no guard is ever held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::domain::website::{WebsiteEntry, WebsiteId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("website `{0}` is not subscribed to the plugin")]
    UnknownWebsite(WebsiteId),
    #[error("subscription token does not match website `{0}`")]
    InvalidToken(WebsiteId),
}

#[derive(Clone, Debug, Default)]
pub struct WebsiteRegistry {
    inner: Arc<RwLock<HashMap<WebsiteId, WebsiteEntry>>>,
}

impl WebsiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &WebsiteId) -> Result<WebsiteEntry, RegistryError> {
        self.read().get(id).cloned().ok_or_else(|| RegistryError::UnknownWebsite(id.clone()))
    }

    pub fn put(&self, id: WebsiteId, entry: WebsiteEntry) {
        self.write().insert(id, entry);
    }

    pub fn update_message(
        &self,
        id: &WebsiteId,
        message: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let mut websites = self.write();
        let entry =
            websites.get_mut(id).ok_or_else(|| RegistryError::UnknownWebsite(id.clone()))?;
        entry.message = message.into();
        Ok(())
    }

    pub fn message(&self, id: &WebsiteId) -> Result<String, RegistryError> {
        self.read()
            .get(id)
            .map(|entry| entry.message.clone())
            .ok_or_else(|| RegistryError::UnknownWebsite(id.clone()))
    }

    pub fn verify_token(&self, id: &WebsiteId, token: &str) -> Result<(), RegistryError> {
        let websites = self.read();
        let entry = websites.get(id).ok_or_else(|| RegistryError::UnknownWebsite(id.clone()))?;
        if entry.token_matches(token) {
            Ok(())
        } else {
            Err(RegistryError::InvalidToken(id.clone()))
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn website_ids(&self) -> Vec<WebsiteId> {
        let mut ids: Vec<WebsiteId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    // Writers only ever insert or assign a whole field, so the map is
    // consistent even if a previous holder panicked.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<WebsiteId, WebsiteEntry>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<WebsiteId, WebsiteEntry>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

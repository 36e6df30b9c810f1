//! Capability contract with the hosted data service.
//!
//! The sync core only cares whether a call succeeded. [`RemoteError`] keeps a
//! human-readable message for the notification banner and the logs.

pub mod memory;
pub mod rest;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::category::{CategoryFields, CategoryPatch, NewCategory};
use crate::task::{NewTask, TaskFields, TaskPatch};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("{0}")]
    Rejected(String),
}

impl RemoteError {
    /// Transient failures worth another attempt. Client errors and malformed responses
    /// will not improve by resending.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport(_) | RemoteError::Timeout(_) => true,
            RemoteError::Service { status, .. } => *status >= 500 || *status == 429,
            RemoteError::Decode(_) | RemoteError::Rejected(_) => false,
        }
    }
}

/// A row as the service returns it: its server id next to the entity fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord<T> {
    pub id: String,

    #[serde(flatten)]
    pub fields: T,
}

pub type RemoteTask = RemoteRecord<TaskFields>;
pub type RemoteCategory = RemoteRecord<CategoryFields>;

#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn list_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError>;

    async fn create_task(&self, task: &NewTask) -> Result<RemoteTask, RemoteError>;

    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<RemoteTask, RemoteError>;

    async fn delete_task(&self, id: &str) -> Result<(), RemoteError>;

    async fn list_categories(&self) -> Result<Vec<RemoteCategory>, RemoteError>;

    async fn create_category(
        &self,
        category: &NewCategory,
    ) -> Result<RemoteCategory, RemoteError>;

    async fn update_category(
        &self,
        id: &str,
        patch: &CategoryPatch,
    ) -> Result<RemoteCategory, RemoteError>;

    async fn delete_category(&self, id: &str) -> Result<(), RemoteError>;
}

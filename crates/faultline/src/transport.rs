// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::TransportError;

/// Response body returned by the collector on success
pub type Response = serde_json::Map<String, serde_json::Value>;

/// Outbound delivery of one notice payload.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one payload. Returns the collector response on success.
    async fn send(&self, payload: &serde_json::Value) -> Result<Response, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, payload: &serde_json::Value) -> Result<Response, TransportError> {
        (**self).send(payload).await
    }
}

/// Keeps every payload in memory instead of sending it. Always succeeds.
///
/// Clones share the same buffer, so a test can keep one clone and hand the other to a client.
#[derive(Clone, Debug, Default)]
pub struct CaptureTransport {
    payloads: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl CaptureTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads received so far, oldest first
    #[must_use]
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl Transport for CaptureTransport {
    async fn send(&self, payload: &serde_json::Value) -> Result<Response, TransportError> {
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.clone());
        Ok(Response::new())
    }
}

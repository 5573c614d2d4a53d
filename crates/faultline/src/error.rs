// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors returned by [`crate::config::Config::validate`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Reasons a notice could not be queued. Neither blocks the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("Delivery queue is full")]
    QueueFull,

    #[error("Delivery worker is not running")]
    WorkerNotRunning,
}

/// Reasons a transport rejected or failed to deliver a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Unauthorized: the API key is missing or invalid")]
    Unauthorized,

    #[error("Payload rejected by the collector")]
    Validation,

    #[error("Rate limited by the collector")]
    RateLimited,

    #[error("Collector error: status {0}")]
    ServerError(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected HTTP status {0}")]
    Http(u16),
}

/// Errors surfaced by [`crate::client::Client`]
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error(transparent)]
    Push(#[from] PushError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

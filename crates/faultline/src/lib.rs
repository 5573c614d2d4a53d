// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Faultline
//!
//! Client-side delivery pipeline of the faultline error-monitoring SDK.
//!
//! ## Overview
//!
//! Captured errors go through three stages:
//! - [`notice`]: a [`Notice`] is assembled from the error, its stack frames, per-call options
//!   and the ambient [`Scope`]. Its data is redacted and bounded by the [`sanitizer`].
//! - [`worker_service`]: notices are queued without blocking and delivered one at a time by a
//!   background task, slowing down exponentially while the collector keeps failing.
//! - [`transport`]: the seam to the collector. [`HttpTransport`] posts JSON, and
//!   [`CaptureTransport`] keeps payloads in memory for tests.
//!
//! [`Client`] ties them together.
//!
//! ```rust,ignore
//! let client = Client::with_http(Config::from_env()?)?;
//!
//! let mut scope = Scope::new();
//! scope.set_context("component", "billing");
//!
//! client.notify(&Exception::from_error(&err), &[], &NoticeOptions::default(), &scope)?;
//! client.shutdown().await;
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod http;
pub mod notice;
pub mod sanitizer;
pub mod scope;
pub mod throttle;
pub mod transport;
pub mod value;
pub mod worker_service;

pub use client::{BeforeNotify, Client, Verdict};
pub use config::Config;
pub use error::{ConfigError, NotifyError, PushError, TransportError};
pub use http::HttpTransport;
pub use notice::{Exception, Frame, Notice, NoticeOptions};
pub use sanitizer::{sanitize, KeyFilter};
pub use scope::Scope;
pub use transport::{CaptureTransport, Transport};
pub use value::{Key, Map, Value};
pub use worker_service::{WorkerHandle, WorkerService, WorkerState};

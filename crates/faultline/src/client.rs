// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::Config;
use crate::error::{ConfigError, NotifyError};
use crate::http::HttpTransport;
use crate::notice::{Exception, Frame, Notice, NoticeOptions};
use crate::scope::Scope;
use crate::transport::{Response, Transport};
use crate::worker_service::{WorkerHandle, WorkerService};

/// Outcome of a before-notify callback.
#[derive(Debug)]
pub enum Verdict {
    /// Keep the notice as is
    Continue,
    /// Use this notice instead, and hand it to the next callback
    Replace(Notice),
    /// Drop the notice, later callbacks are not run
    Skip,
}

pub type BeforeNotify = Arc<dyn Fn(&Notice) -> Verdict + Send + Sync>;

/// Entry point for reporting errors.
///
/// Must be created inside a tokio runtime, which runs the delivery worker.
pub struct Client {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    worker: WorkerHandle,
    before_notify: Vec<BeforeNotify>,
}

impl Client {
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        config.validate()?;
        let worker = WorkerService::spawn(
            Arc::clone(&transport),
            config.max_queue_size,
            config.shutdown_timeout(),
        );
        Ok(Self {
            config: Arc::new(config),
            transport,
            worker,
            before_notify: Vec::new(),
        })
    }

    /// Client delivering to the configured collector over HTTP.
    pub fn with_http(config: Config) -> Result<Self, ConfigError> {
        let transport = Arc::new(HttpTransport::new(&config));
        Self::new(config, transport)
    }

    /// Appends a callback run on every notice, in registration order.
    pub fn add_before_notify<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&Notice) -> Verdict + Send + Sync + 'static,
    {
        self.before_notify.push(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    /// Builds a notice and queues it for background delivery.
    ///
    /// Returns `Ok` without queuing anything when the environment or the error class is
    /// excluded, or when a callback skipped the notice.
    ///
    /// # Errors
    ///
    /// Fails with [`NotifyError::Push`] when the queue is full or the worker is stopped.
    pub fn notify(
        &self,
        exception: &Exception,
        frames: &[Frame],
        options: &NoticeOptions,
        scope: &Scope,
    ) -> Result<(), NotifyError> {
        let Some(notice) = self.prepare(exception, frames, options, scope) else {
            return Ok(());
        };
        self.worker.push(notice)?;
        Ok(())
    }

    /// Builds a notice and sends it right away, bypassing the queue and the throttle.
    ///
    /// Returns `Ok(None)` when nothing was sent, see [`Client::notify`].
    ///
    /// # Errors
    ///
    /// Fails with [`NotifyError::Transport`] when the collector could not be reached or
    /// rejected the notice.
    pub async fn send(
        &self,
        exception: &Exception,
        frames: &[Frame],
        options: &NoticeOptions,
        scope: &Scope,
    ) -> Result<Option<Response>, NotifyError> {
        let Some(notice) = self.prepare(exception, frames, options, scope) else {
            return Ok(None);
        };
        let response = self.transport.send(&notice.to_payload()).await?;
        Ok(Some(response))
    }

    /// Waits for queued notices using the configured flush timeout.
    pub async fn flush(&self) {
        self.worker.flush(self.config.flush_timeout()).await;
    }

    pub async fn flush_within(&self, timeout: Duration) {
        self.worker.flush(timeout).await;
    }

    /// Stops the worker. Notices reported afterwards are rejected.
    pub async fn shutdown(&self) {
        self.worker.stop().await;
    }

    fn prepare(
        &self,
        exception: &Exception,
        frames: &[Frame],
        options: &NoticeOptions,
        scope: &Scope,
    ) -> Option<Notice> {
        if self.config.is_excluded_env() {
            debug!(
                "Environment '{}' is excluded, not reporting {}",
                self.config.environment_name,
                exception.class()
            );
            return None;
        }
        if self.config.is_excluded_error(exception.class()) {
            debug!("Error class {} is excluded, not reporting", exception.class());
            return None;
        }

        let notice = Notice::build(exception, frames, options, scope, &self.config);
        self.run_before_notify(notice)
    }

    fn run_before_notify(&self, mut notice: Notice) -> Option<Notice> {
        for callback in &self.before_notify {
            match callback(&notice) {
                Verdict::Continue => {}
                Verdict::Replace(replacement) => notice = replacement,
                Verdict::Skip => {
                    debug!("Notice {} skipped by a callback", notice.error_class());
                    return None;
                }
            }
        }
        Some(notice)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("worker", &self.worker)
            .field("before_notify", &self.before_notify.len())
            .finish_non_exhaustive()
    }
}

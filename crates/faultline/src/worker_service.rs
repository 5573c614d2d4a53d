// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Actor-based delivery worker.
//!
//! Producers hold a cloneable [`WorkerHandle`]. A single [`WorkerService`] task owns the
//! queue and the throttle and sends notices one at a time, in push order:
//!
//! ```text
//!    ┌──────────────┐
//!    │   Handles    │  push() is a try_send and never blocks
//!    └──────┬───────┘
//!           │ bounded notice channel + unbounded control channel
//!           v
//!    ┌──────────────┐
//!    │   Service    │  sleep(throttle delay), then transport.send()
//!    └──────┬───────┘
//!           v
//!       Transport
//! ```
//!
//! Flush and stop carry a deadline. When it passes, the notice in flight is abandoned and
//! whatever is still queued is discarded.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::PushError;
use crate::notice::Notice;
use crate::throttle::Throttle;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Queue empty, waiting for notices
    Idle,
    /// Delivering queued notices
    Draining,
    /// No longer accepting notices
    Stopped,
}

/// Snapshot published by the worker after every state or throttle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub throttle: u32,
}

/// Control messages. Notices travel on their own bounded channel.
#[derive(Debug)]
pub enum WorkerCommand {
    /// Deliver everything queued before `deadline`, then reply.
    Flush {
        deadline: Instant,
        reply: oneshot::Sender<()>,
    },
    /// Stop accepting notices, deliver what is queued before `deadline`, reply and exit.
    Stop {
        deadline: Instant,
        reply: oneshot::Sender<()>,
    },
}

impl WorkerCommand {
    fn deadline(&self) -> Instant {
        match self {
            WorkerCommand::Flush { deadline, .. } | WorkerCommand::Stop { deadline, .. } => {
                *deadline
            }
        }
    }
}

/// Cloneable producer side of the delivery worker.
#[derive(Clone, Debug)]
pub struct WorkerHandle {
    notices: mpsc::Sender<Notice>,
    control: mpsc::UnboundedSender<WorkerCommand>,
    status: watch::Receiver<WorkerStatus>,
    accepting: Arc<AtomicBool>,
    shutdown_timeout: Duration,
}

impl WorkerHandle {
    /// Queues a notice for delivery without waiting.
    ///
    /// # Errors
    ///
    /// - [`PushError::QueueFull`] when the queue is at capacity. The queue is left unchanged.
    /// - [`PushError::WorkerNotRunning`] once [`WorkerHandle::stop`] has been called.
    pub fn push(&self, notice: Notice) -> Result<(), PushError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(PushError::WorkerNotRunning);
        }
        self.notices.try_send(notice).map_err(|e| match e {
            TrySendError::Full(_) => PushError::QueueFull,
            TrySendError::Closed(_) => PushError::WorkerNotRunning,
        })
    }

    /// Waits until everything queued so far is delivered, at most `timeout`.
    ///
    /// This is best-effort: notices still queued when the timeout expires are discarded.
    pub async fn flush(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let (reply, done) = oneshot::channel();
        if self
            .control
            .send(WorkerCommand::Flush { deadline, reply })
            .is_err()
        {
            debug!("Delivery worker not running, nothing to flush");
            return;
        }
        if timeout_at(deadline, done).await.is_err() {
            debug!("Flush deadline reached after {} ms", timeout.as_millis());
        }
    }

    /// Stops the worker, delivering what is queued within the shutdown timeout.
    ///
    /// Calling this on a stopped worker returns immediately.
    pub async fn stop(&self) {
        self.accepting.store(false, Ordering::Release);
        if self.state() == WorkerState::Stopped {
            return;
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        let (reply, done) = oneshot::channel();
        if self
            .control
            .send(WorkerCommand::Stop { deadline, reply })
            .is_err()
        {
            return;
        }
        if timeout_at(deadline, done).await.is_err() {
            warn!(
                "Delivery worker did not stop within {} ms",
                self.shutdown_timeout.as_millis()
            );
        }
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.status.borrow().state
    }

    /// Current throttle level, for diagnostics only.
    #[must_use]
    pub fn throttle(&self) -> u32 {
        self.status.borrow().throttle
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WorkerStatus> {
        self.status.clone()
    }
}

/// Owns the queue and the throttle, and runs the dispatch loop.
pub struct WorkerService {
    transport: Arc<dyn Transport>,
    throttle: Throttle,
    notices: mpsc::Receiver<Notice>,
    control: mpsc::UnboundedReceiver<WorkerCommand>,
    status: watch::Sender<WorkerStatus>,
    accepting: Arc<AtomicBool>,
    // Notices dropped mid-send, reported with the next drain
    abandoned: usize,
}

impl WorkerService {
    /// Creates a service holding at most `max_queue_size` queued notices.
    ///
    /// Returns both the service (to be run) and a handle (to push notices).
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        max_queue_size: usize,
        shutdown_timeout: Duration,
    ) -> (Self, WorkerHandle) {
        let (notices_tx, notices_rx) = mpsc::channel(max_queue_size.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(WorkerStatus {
            state: WorkerState::Idle,
            throttle: 0,
        });
        let accepting = Arc::new(AtomicBool::new(true));

        let service = Self {
            transport,
            throttle: Throttle::new(),
            notices: notices_rx,
            control: control_rx,
            status: status_tx,
            accepting: Arc::clone(&accepting),
            abandoned: 0,
        };
        let handle = WorkerHandle {
            notices: notices_tx,
            control: control_tx,
            status: status_rx,
            accepting,
            shutdown_timeout,
        };

        (service, handle)
    }

    /// Creates the service and runs it on the current tokio runtime.
    #[must_use]
    pub fn spawn(
        transport: Arc<dyn Transport>,
        max_queue_size: usize,
        shutdown_timeout: Duration,
    ) -> WorkerHandle {
        let (service, handle) = Self::new(transport, max_queue_size, shutdown_timeout);
        tokio::spawn(service.run());
        handle
    }

    /// Runs the dispatch loop until stopped or until every handle is dropped.
    pub async fn run(mut self) {
        debug!("Delivery worker started");

        loop {
            if let Ok(command) = self.control.try_recv() {
                if self.handle(command).await.is_break() {
                    break;
                }
                continue;
            }

            let notice = match self.notices.try_recv() {
                Ok(notice) => notice,
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {
                    self.publish(WorkerState::Idle);
                    tokio::select! {
                        biased;
                        command = self.control.recv() => match command {
                            Some(command) => {
                                if self.handle(command).await.is_break() {
                                    break;
                                }
                                continue;
                            }
                            None => break,
                        },
                        notice = self.notices.recv() => match notice {
                            Some(notice) => notice,
                            None => break,
                        },
                    }
                }
            };

            self.publish(WorkerState::Draining);
            if let Some(command) = self.deliver_interruptible(notice).await {
                if self.handle(command).await.is_break() {
                    break;
                }
            }
        }

        self.accepting.store(false, Ordering::Release);
        self.notices.close();
        self.publish(WorkerState::Stopped);
        debug!("Delivery worker stopped");
    }

    async fn handle(&mut self, command: WorkerCommand) -> ControlFlow<()> {
        match command {
            WorkerCommand::Flush { deadline, reply } => {
                self.drain(deadline).await;
                if reply.send(()).is_err() {
                    debug!("Flush caller went away before the flush completed");
                }
                ControlFlow::Continue(())
            }
            WorkerCommand::Stop { deadline, reply } => {
                debug!("Delivery worker shutting down");
                self.accepting.store(false, Ordering::Release);
                self.notices.close();
                self.drain(deadline).await;
                self.publish(WorkerState::Stopped);
                if reply.send(()).is_err() {
                    debug!("Stop caller went away before the worker stopped");
                }
                ControlFlow::Break(())
            }
        }
    }

    /// Delivers one notice. A control command arriving meanwhile is returned to the caller,
    /// after the delivery finished or was abandoned at the command's deadline.
    async fn deliver_interruptible(&mut self, notice: Notice) -> Option<WorkerCommand> {
        let mut abandoned = false;
        let command = {
            let delivery = deliver(self.transport.as_ref(), &mut self.throttle, notice);
            tokio::pin!(delivery);

            tokio::select! {
                biased;
                () = &mut delivery => None,
                Some(command) = self.control.recv() => {
                    if timeout_at(command.deadline(), &mut delivery).await.is_err() {
                        debug!("Deadline passed during delivery, abandoning the notice in flight");
                        abandoned = true;
                    }
                    Some(command)
                }
            }
        };
        self.abandoned += usize::from(abandoned);
        self.publish(WorkerState::Draining);
        command
    }

    /// Delivers queued notices until the queue is empty or `deadline` passes.
    async fn drain(&mut self, deadline: Instant) {
        let mut in_flight = false;
        let drained = {
            let transport = self.transport.as_ref();
            let throttle = &mut self.throttle;
            let notices = &mut self.notices;
            let status = &self.status;
            let in_flight = &mut in_flight;

            timeout_at(deadline, async move {
                while let Ok(notice) = notices.try_recv() {
                    status.send_replace(WorkerStatus {
                        state: WorkerState::Draining,
                        throttle: throttle.level(),
                    });
                    *in_flight = true;
                    deliver(transport, throttle, notice).await;
                    *in_flight = false;
                }
            })
            .await
        };

        let mut dropped = std::mem::take(&mut self.abandoned);
        if drained.is_err() {
            dropped += usize::from(in_flight);
            while self.notices.try_recv().is_ok() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(
                dropped,
                "Delivery deadline passed, discarding {} undelivered notices", dropped
            );
        }
        self.publish(WorkerState::Idle);
    }

    fn publish(&self, state: WorkerState) {
        self.status.send_replace(WorkerStatus {
            state,
            throttle: self.throttle.level(),
        });
    }
}

/// Waits out the throttle delay, sends one notice and updates the throttle.
async fn deliver(transport: &dyn Transport, throttle: &mut Throttle, notice: Notice) {
    let delay = throttle.delay();
    if !delay.is_zero() {
        debug!(
            throttle = throttle.level(),
            "Throttling delivery for {} ms",
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
    }

    let payload = notice.to_payload();
    match transport.send(&payload).await {
        Ok(_) => {
            throttle.record_success();
            debug!(
                class = notice.error_class(),
                throttle = throttle.level(),
                "Notice delivered"
            );
        }
        Err(e) => {
            throttle.record_failure();
            warn!(
                class = notice.error_class(),
                throttle = throttle.level(),
                "Failed to deliver notice: {}",
                e
            );
        }
    }
}

use crate::engine::LookupEngine;
use crate::models::{EventKind, InboundEvent, LookupCategory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Lifecycle of the worker context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GatewayState {
    Uninitialized = 0,
    Starting = 1,
    Ready = 2,
    Draining = 3,
    Stopped = 4,
}

impl GatewayState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => GatewayState::Starting,
            2 => GatewayState::Ready,
            3 => GatewayState::Draining,
            4 => GatewayState::Stopped,
            _ => GatewayState::Uninitialized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayState::Uninitialized => "uninitialized",
            GatewayState::Starting => "starting",
            GatewayState::Ready => "ready",
            GatewayState::Draining => "draining",
            GatewayState::Stopped => "stopped",
        }
    }
}

/// Result of handing an inbound event to the worker context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Enqueued and the worker confirmed pickup within the bounded wait.
    Accepted,
    /// Enqueued; pickup confirmation did not arrive in time. The work still
    /// runs to completion.
    AcceptedUnconfirmed,
    /// No running worker context; the transport should retry later.
    NotReady,
    /// The hand-off itself failed (queue saturated). Distinguishable so the
    /// transport can retry without data loss.
    Rejected,
}

/// Shared counters, readable from both concurrency domains.
pub struct GatewayMetrics {
    state: AtomicU8,
    processed: AtomicU64,
}

impl GatewayMetrics {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(GatewayState::Uninitialized as u8),
            processed: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> GatewayState {
        GatewayState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: GatewayState) {
        self.state.store(state as u8, Ordering::SeqCst);
        tracing::info!("Gateway state -> {}", state.as_str());
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

struct WorkItem {
    event: InboundEvent,
    picked_up: oneshot::Sender<()>,
}

struct Inner {
    tx: Option<mpsc::Sender<WorkItem>>,
    worker: Option<JoinHandle<()>>,
}

/// Bridge between the request-serving context (axum handler pool) and the
/// single long-lived worker context.
///
/// All chat-protocol state (per-user "awaiting query" dialogue) lives inside
/// the worker task, which is the channel's sole consumer. The submitting
/// side never executes a work unit directly and never blocks past the
/// configured confirmation wait.
pub struct EventGateway {
    metrics: Arc<GatewayMetrics>,
    inner: Mutex<Inner>,
    confirm_wait: Duration,
}

impl EventGateway {
    pub fn new(confirm_wait: Duration) -> Self {
        Self {
            metrics: Arc::new(GatewayMetrics::new()),
            inner: Mutex::new(Inner {
                tx: None,
                worker: None,
            }),
            confirm_wait,
        }
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        self.metrics.clone()
    }

    pub fn state(&self) -> GatewayState {
        self.metrics.state()
    }

    /// Construct the worker context and flip to `Ready`.
    ///
    /// Events submitted before this returns are rejected with `NotReady`.
    pub fn start(&self, engine: Arc<LookupEngine>, admin_key: String, queue_capacity: usize) {
        let mut inner = self.inner.lock().expect("gateway inner lock poisoned");
        if inner.worker.is_some() {
            tracing::warn!("Gateway start requested but worker already running");
            return;
        }

        self.metrics.set_state(GatewayState::Starting);

        let (tx, rx) = mpsc::channel(queue_capacity);
        let metrics = self.metrics.clone();
        let handle = tokio::spawn(worker_loop(rx, engine, admin_key, metrics));

        inner.tx = Some(tx);
        inner.worker = Some(handle);
        self.metrics.set_state(GatewayState::Ready);
    }

    /// Hand one inbound event to the worker context.
    pub async fn submit(&self, event: InboundEvent) -> SubmitOutcome {
        if self.state() != GatewayState::Ready {
            return SubmitOutcome::NotReady;
        }

        let tx = {
            let inner = self.inner.lock().expect("gateway inner lock poisoned");
            match &inner.tx {
                Some(tx) => tx.clone(),
                None => return SubmitOutcome::NotReady,
            }
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        let item = WorkItem {
            event,
            picked_up: ack_tx,
        };

        match tx.try_send(item) {
            Ok(()) => match tokio::time::timeout(self.confirm_wait, ack_rx).await {
                Ok(Ok(())) => SubmitOutcome::Accepted,
                // Worker busy (or gone): the item stays queued and will run
                // to completion; we just cannot confirm in time.
                _ => SubmitOutcome::AcceptedUnconfirmed,
            },
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Gateway queue saturated, rejecting event");
                SubmitOutcome::Rejected
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!("Gateway worker terminated, rejecting event");
                SubmitOutcome::NotReady
            }
        }
    }

    /// Drain in-flight work, then release the worker context.
    pub async fn shutdown(&self) {
        self.metrics.set_state(GatewayState::Draining);

        let (tx, worker) = {
            let mut inner = self.inner.lock().expect("gateway inner lock poisoned");
            (inner.tx.take(), inner.worker.take())
        };
        // Closing the channel lets the worker finish everything already
        // queued before it exits.
        drop(tx);

        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                tracing::error!("Worker task ended abnormally: {}", e);
            }
        }

        self.metrics.set_state(GatewayState::Stopped);
    }
}

/// The single worker context. Sole consumer of the hand-off channel and sole
/// owner of per-user dialogue state.
async fn worker_loop(
    mut rx: mpsc::Receiver<WorkItem>,
    engine: Arc<LookupEngine>,
    admin_key: String,
    metrics: Arc<GatewayMetrics>,
) {
    tracing::info!("Worker context started");
    let mut dialogues: HashMap<String, LookupCategory> = HashMap::new();

    while let Some(item) = rx.recv().await {
        // Pickup confirmation for the submitting side; a dropped receiver
        // just means the submitter stopped waiting.
        let _ = item.picked_up.send(());

        handle_event(&engine, &admin_key, &metrics, &mut dialogues, item.event).await;
        metrics.processed.fetch_add(1, Ordering::Relaxed);
    }

    tracing::info!("Worker context drained, releasing chat resources");
}

async fn handle_event(
    engine: &Arc<LookupEngine>,
    admin_key: &str,
    metrics: &Arc<GatewayMetrics>,
    dialogues: &mut HashMap<String, LookupCategory>,
    event: InboundEvent,
) {
    let user = event.user;

    match event.kind {
        EventKind::CategorySelected { category } => {
            dialogues.insert(user.clone(), category);
            engine
                .notify(
                    &user,
                    &format!("Send the {} query you want to look up.", category.label()),
                )
                .await;
        }
        EventKind::Query { text } => {
            let Some(category) = dialogues.remove(&user) else {
                engine
                    .notify(&user, "Select a lookup category first.")
                    .await;
                return;
            };

            // Panic fence: one faulting work unit must not take down the
            // worker context.
            let task_engine = engine.clone();
            let task_user = user.clone();
            let handle = tokio::spawn(async move {
                task_engine.run_lookup(&task_user, category, &text).await
            });
            match handle.await {
                Ok(outcome) => {
                    tracing::debug!("Work unit for {} finished: {:?}", user, outcome);
                }
                Err(e) => {
                    tracing::error!("Work unit for {} panicked: {}", user, e);
                    engine
                        .notify(&user, "Something went wrong. Please try again.")
                        .await;
                }
            }
        }
        EventKind::Grant {
            target,
            amount,
            grant_id,
        } => {
            if user != admin_key {
                engine.notify(&user, "You are not allowed to do that.").await;
                return;
            }
            match engine.grant(&target, amount, grant_id).await {
                Ok(true) => {
                    engine
                        .notify(&user, &format!("Credited {} to {}.", amount, target))
                        .await;
                }
                Ok(false) => {
                    engine
                        .notify(&user, &format!("Grant {} was already applied.", grant_id))
                        .await;
                }
                Err(e) => {
                    tracing::error!("Credit grant failed: {}", e);
                    engine.notify(&user, "Grant failed.").await;
                }
            }
        }
        EventKind::Balance { target } => {
            let subject = target.unwrap_or_else(|| user.clone());
            // Anyone may read their own account; only the admin reads others.
            if subject != user && user != admin_key {
                engine.notify(&user, "You are not allowed to do that.").await;
                return;
            }
            match engine.balance_text(&subject).await {
                Ok(text) => engine.notify(&user, &text).await,
                Err(e) => {
                    tracing::error!("Balance read failed: {}", e);
                    engine.notify(&user, "Balance unavailable.").await;
                }
            }
        }
        EventKind::Broadcast { text } => {
            if user != admin_key {
                engine.notify(&user, "You are not allowed to do that.").await;
                return;
            }
            match engine.broadcast(&text).await {
                Ok(delivered) => {
                    engine
                        .notify(&user, &format!("Broadcast delivered to {} users.", delivered))
                        .await;
                }
                Err(e) => {
                    tracing::error!("Broadcast failed: {}", e);
                    engine.notify(&user, "Broadcast failed.").await;
                }
            }
        }
        EventKind::Diagnostics => {
            if user != admin_key {
                engine.notify(&user, "You are not allowed to do that.").await;
                return;
            }
            let users = engine.user_count().await.unwrap_or(-1);
            let text = format!(
                "Gateway: {}\nProcessed events: {}\nKnown users: {}",
                metrics.state().as_str(),
                metrics.processed(),
                users
            );
            engine.notify(&user, &text).await;
        }
    }
}

//! Tokio-driven drain loop around `wg_core::send_queue::SendQueue`: the
//! pure engine decides what to dispatch and when; this module performs
//! the actual upstream call and persists the outcome.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;
use wg_core::send_queue::{DispatchHandle, DrainAction, Priority, QueueItem, SendOutcome, SendQueue};
use wg_protocol::upstream::{UpstreamErrorKind, UpstreamSendOutcome};
use wg_protocol::MessageContent;

use crate::repo;
use crate::state::AppState;

/// Why a job was enqueued, carried through so the dispatcher knows which
/// persistent row to update once the send completes.
#[derive(Debug, Clone)]
pub enum SendPurpose {
    /// Welcome-message delivery on the "start" intent; nothing to persist
    /// beyond the funnel event already recorded by the webhook processor.
    Start,
    Downsell { schedule_id: Uuid },
    Shot { broadcast_id: Uuid, row_id: i64 },
}

#[derive(Debug, Clone)]
pub struct SendJob {
    pub tenant_id: Uuid,
    pub tenant_slug: String,
    pub content: MessageContent,
    pub purpose: SendPurpose,
}

impl SendJob {
    pub fn priority(&self) -> Priority {
        match self.purpose {
            SendPurpose::Start => Priority::Start,
            SendPurpose::Shot { .. } => Priority::Shot,
            SendPurpose::Downsell { .. } => Priority::Downsell,
        }
    }
}

pub struct SendQueueHandle {
    queue: Mutex<SendQueue<SendJob>>,
    notify: Notify,
}

impl Default for SendQueueHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SendQueueHandle {
    pub fn new() -> Self {
        Self { queue: Mutex::new(SendQueue::new(Instant::now())), notify: Notify::new() }
    }

    /// Enqueues `job` at its own priority, to `recipient`'s FIFO slot.
    pub fn enqueue(&self, recipient: i64, job: SendJob) {
        let priority = job.priority();
        self.queue.lock().expect("send queue mutex poisoned").enqueue(priority, recipient, job, Instant::now());
        self.notify.notify_one();
    }

    /// Sweeps idle per-recipient bucket/back-off/fallback state; called
    /// periodically by the rate-limiter GC loop.
    pub fn gc_idle(&self) -> usize {
        self.queue.lock().expect("send queue mutex poisoned").gc_idle(Instant::now())
    }
}

fn priority_label(p: Priority) -> &'static str {
    match p {
        Priority::Start => "start",
        Priority::Shot => "shot",
        Priority::Downsell => "downsell",
    }
}

/// The drain loop: spawned once from `main.rs`, runs for the process
/// lifetime. Each dispatch is handed to its own task so that, per spec
/// §4.5's suspension-point note, the callback's I/O runs concurrently with
/// the next drain step rather than blocking it.
pub async fn run_drain_loop(state: Arc<AppState>) {
    loop {
        let action = {
            let mut q = state.send_queue.queue.lock().expect("send queue mutex poisoned");
            q.drain_step(Instant::now())
        };
        match action {
            DrainAction::Dispatch { handle, item } => {
                let state = state.clone();
                tokio::spawn(async move { dispatch_and_record(state, handle, item).await });
            }
            DrainAction::WaitFor(delay) => tokio::time::sleep(delay).await,
            DrainAction::Idle => {
                tokio::select! {
                    _ = state.send_queue.notify.notified() => {}
                    _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                }
            }
        }
    }
}

async fn dispatch_and_record(state: Arc<AppState>, handle: DispatchHandle, item: QueueItem<SendJob>) {
    let wait_ms = item.enqueued_at.elapsed().as_secs_f64() * 1000.0;
    state.metrics.observe("send_queue_wait_ms", wait_ms, &[("priority", priority_label(handle.priority))]);

    let (queue_outcome, text_result) = perform_send(&state, &item.payload, handle.recipient).await;
    let purpose = item.payload.purpose.clone();

    {
        let mut q = state.send_queue.queue.lock().expect("send queue mutex poisoned");
        q.record_result(handle, item, queue_outcome, Instant::now());
    }

    persist_outcome(&state, &purpose, text_result).await;
}

/// Sends the job's media block (best-effort, not gated by the send queue's
/// own back-off since a warm-up miss degrades to "skip media this
/// delivery" rather than a retryable failure) followed by the text body,
/// whose outcome drives the queue's back-off/fallback state.
async fn perform_send(state: &AppState, job: &SendJob, recipient: i64) -> (SendOutcome, UpstreamSendOutcome) {
    let token = match state.vault.get(&job.tenant_slug).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            warn!(tenant = %job.tenant_slug, "no credential configured, dropping send");
            return (SendOutcome::OtherFailure, UpstreamSendOutcome::Error(UpstreamErrorKind::Forbidden));
        }
        Err(err) => {
            warn!(tenant = %job.tenant_slug, error = %err, "vault lookup failed");
            return (SendOutcome::OtherFailure, UpstreamSendOutcome::Error(UpstreamErrorKind::Other));
        }
    };

    for media_ref in job.content.media_in_send_order() {
        send_media_best_effort(state, job.tenant_id, &job.tenant_slug, &token, recipient, media_ref).await;
    }

    let outcome = state.upstream_send.send_message(&token, recipient, &job.content.text, &job.content.parse_mode).await;
    let queue_outcome = match &outcome {
        UpstreamSendOutcome::Sent { .. } => SendOutcome::Success,
        UpstreamSendOutcome::RateLimited { retry_after_secs } => SendOutcome::RateLimited { retry_after_secs: Some(*retry_after_secs) },
        UpstreamSendOutcome::Error(_) => SendOutcome::OtherFailure,
    };
    (queue_outcome, outcome)
}

async fn send_media_best_effort(
    state: &AppState,
    tenant_id: Uuid,
    tenant_slug: &str,
    token: &str,
    recipient: i64,
    media_ref: &wg_protocol::MediaRef,
) {
    match state.media.ready_handle(tenant_id, &media_ref.sha256, media_ref.kind).await {
        Some(handle) => {
            let outcome = state
                .upstream_send
                .send_media_by_handle(token, recipient, media_ref.kind.as_str(), &wg_protocol::upstream::RemoteFileHandle(handle))
                .await;
            if let UpstreamSendOutcome::Error(kind) = outcome {
                warn!(tenant = %tenant_slug, sha256 = %media_ref.sha256, ?kind, "media re-send failed");
            }
        }
        None => {
            info!(tenant = %tenant_slug, sha256 = %media_ref.sha256, "media not warmed up yet, queuing warm-up and skipping for this delivery");
            state.media.request_warmup(tenant_id, tenant_slug, &media_ref.sha256, media_ref.kind).await;
        }
    }
}

/// Translates the text send's outcome into the corresponding persistent
/// row transition for the job's purpose.
async fn persist_outcome(state: &AppState, purpose: &SendPurpose, outcome: UpstreamSendOutcome) {
    match purpose {
        SendPurpose::Start => {
            if let UpstreamSendOutcome::Error(kind) = &outcome {
                warn!(?kind, "welcome message delivery failed");
            }
        }
        SendPurpose::Downsell { schedule_id } => match outcome {
            UpstreamSendOutcome::Sent { message_id } => {
                if let Err(err) = repo::schedules::mark_sent(&state.db, *schedule_id, message_id).await {
                    warn!(schedule_id = %schedule_id, error = %err, "failed to persist downsell sent state");
                }
            }
            UpstreamSendOutcome::Error(kind) if kind.is_skip_worthy() => {
                let _ = repo::schedules::mark_skipped(&state.db, *schedule_id, &format!("{kind:?}")).await;
            }
            UpstreamSendOutcome::Error(kind) => {
                let _ = repo::schedules::mark_failed(&state.db, *schedule_id, &format!("{kind:?}")).await;
            }
            UpstreamSendOutcome::RateLimited { .. } => {
                // left `pending`; the queue itself re-pushed the item to
                // the head and will retry up to the attempt cap.
            }
        },
        SendPurpose::Shot { broadcast_id, row_id } => match outcome {
            UpstreamSendOutcome::Sent { .. } => {
                if let Err(err) = repo::broadcasts::mark_row_sent(&state.db, *row_id, *broadcast_id).await {
                    warn!(row_id, error = %err, "failed to persist broadcast row sent state");
                }
            }
            UpstreamSendOutcome::Error(kind) if kind.is_skip_worthy() => {
                let _ = repo::broadcasts::mark_row_skipped(&state.db, *row_id, *broadcast_id, &format!("{kind:?}")).await;
            }
            UpstreamSendOutcome::Error(kind) => {
                let _ = repo::broadcasts::mark_row_failed(&state.db, *row_id, *broadcast_id, &format!("{kind:?}")).await;
            }
            UpstreamSendOutcome::RateLimited { .. } => {}
        },
    }
}

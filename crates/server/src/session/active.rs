// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory state for one live session: the subprocess handle, the event
//! ring, the subscriber set, and the turn bookkeeping.
//!
//! Everything ordering-sensitive (seq assignment, ring append, subscriber
//! delivery, bootstrap replay) happens under one internal lock, so every
//! subscriber observes a gap-free prefix of the session's event sequence.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::agent::AgentProcess;
use crate::session::dedupe::TurnDedupeCache;
use crate::session::record::{epoch_ms, SessionRecord, SessionStatus};
use crate::session::ring::{EventRecord, EventRing};
use crate::transport::ws_msg::{ServerMessage, SubscriptionLevel};

/// One outbound frame for a client connection. Session events carry their
/// ring seq; connection-scoped frames (`command_result`, errors) do not.
#[derive(Debug, Clone)]
pub struct OutFrame {
    pub seq: Option<u64>,
    pub msg: ServerMessage,
}

impl OutFrame {
    pub fn control(msg: ServerMessage) -> Self {
        Self { seq: None, msg }
    }
}

/// Sink half of a client connection's outbound queue.
pub type FrameSink = mpsc::UnboundedSender<OutFrame>;

/// A queued turn dispatch awaiting its `turn_start` from the agent.
#[derive(Debug, Clone)]
pub struct PendingTurnStart {
    pub client_turn_id: String,
    pub request_id: String,
}

/// In-flight graceful-stop escalation timers.
pub struct StopFlow {
    pub t1: CancellationToken,
    pub t2: CancellationToken,
}

impl StopFlow {
    pub fn cancel(&self) {
        self.t1.cancel();
        self.t2.cancel();
    }
}

struct Subscriber {
    level: SubscriptionLevel,
    sink: FrameSink,
}

struct ActiveInner {
    record: SessionRecord,
    ring: EventRing,
    seq: u64,
    subscribers: HashMap<u64, Subscriber>,
    next_subscriber_id: u64,
    dedupe: TurnDedupeCache,
    pending_turn_starts: VecDeque<PendingTurnStart>,
    rpc_waiters: HashMap<String, oneshot::Sender<RpcResponse>>,
    stop_flow: Option<StopFlow>,
    /// Accumulated output per tool call, for the REST accessor. Bounded;
    /// oldest calls fall off first.
    tool_outputs: indexmap::IndexMap<String, String>,
}

/// How many finished/active tool outputs are kept per session.
const TOOL_OUTPUT_KEEP: usize = 32;

/// A command_response surfaced to an RPC waiter.
#[derive(Debug, Clone)]
pub struct RpcResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// The result of a subscribe bootstrap.
pub struct SubscribeOutcome {
    pub subscriber_id: u64,
    /// Whether the ring could serve `since_seq` (false = resync).
    pub replayed: bool,
}

/// A live session.
pub struct ActiveSession {
    pub id: String,
    pub workspace_id: String,
    pub container: bool,
    pub agent: AgentProcess,
    inner: Mutex<ActiveInner>,
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("id", &self.id)
            .field("workspace_id", &self.workspace_id)
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl ActiveSession {
    pub fn new(
        record: SessionRecord,
        container: bool,
        agent: AgentProcess,
        ring_capacity: usize,
        dedupe_capacity: usize,
        dedupe_ttl_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: record.id.clone(),
            workspace_id: record.workspace_id.clone(),
            container,
            agent,
            inner: Mutex::new(ActiveInner {
                record,
                ring: EventRing::new(ring_capacity),
                seq: 0,
                subscribers: HashMap::new(),
                next_subscriber_id: 0,
                dedupe: TurnDedupeCache::new(dedupe_capacity, dedupe_ttl_ms),
                pending_turn_starts: VecDeque::new(),
                rpc_waiters: HashMap::new(),
                stop_flow: None,
                tool_outputs: indexmap::IndexMap::new(),
            }),
        })
    }

    /// Assign the next seq, append to the ring, and deliver to every
    /// subscriber. Returns the assigned seq (0 if the lock is poisoned).
    pub fn broadcast(&self, msg: ServerMessage) -> u64 {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        inner.seq += 1;
        let record = EventRecord { seq: inner.seq, event: msg, timestamp: epoch_ms() };
        if let Err(e) = inner.ring.push(record.clone()) {
            debug!(session_id = %self.id, %e, "ring push rejected");
        }
        let notification = record.event.notification_worthy();
        inner.subscribers.retain(|_, sub| {
            if sub.level == SubscriptionLevel::Notifications && !notification {
                return true;
            }
            sub.sink
                .send(OutFrame { seq: Some(record.seq), msg: record.event.clone() })
                .is_ok()
        });
        record.seq
    }

    /// Atomic subscribe bootstrap.
    ///
    /// Under the session lock, pushes `connected` → `state` → replay
    /// frames → `command_result` into the sink, then registers it for live
    /// events. Because `broadcast` takes the same lock, no live event can
    /// interleave with (or precede) the bootstrap.
    pub fn subscribe(
        &self,
        level: SubscriptionLevel,
        since_seq: Option<u64>,
        request_id: &str,
        sink: FrameSink,
    ) -> Option<SubscribeOutcome> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };

        let record = inner.record.clone();
        let current_seq = inner.seq;
        let _ = sink.send(OutFrame::control(ServerMessage::Connected {
            session: record.clone(),
            current_seq,
        }));
        let _ = sink.send(OutFrame::control(ServerMessage::State { session: record }));

        let mut replayed = false;
        if let Some(since) = since_seq {
            if inner.ring.can_serve(since) {
                for event in inner.ring.since(since) {
                    let _ = sink.send(OutFrame { seq: Some(event.seq), msg: event.event });
                }
                replayed = true;
            }
            // Resync case: the full `state` snapshot above already covers it.
        }

        let _ = sink.send(OutFrame::control(crate::transport::ws_msg::command_result(
            "subscribe",
            request_id,
            true,
            None,
            None,
        )));

        inner.next_subscriber_id += 1;
        let subscriber_id = inner.next_subscriber_id;
        inner.subscribers.insert(subscriber_id, Subscriber { level, sink });
        Some(SubscribeOutcome { subscriber_id, replayed })
    }

    pub fn unsubscribe(&self, subscriber_id: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribers.remove(&subscriber_id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().map(|i| i.subscribers.len()).unwrap_or(0)
    }

    /// Snapshot of the session record.
    pub fn record(&self) -> SessionRecord {
        self.inner
            .lock()
            .map(|i| i.record.clone())
            .unwrap_or_else(|_| {
                SessionRecord::new(self.id.clone(), self.workspace_id.clone(), String::new(), 0)
            })
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().map(|i| i.record.status).unwrap_or(SessionStatus::Error)
    }

    pub fn current_seq(&self) -> u64 {
        self.inner.lock().map(|i| i.seq).unwrap_or(0)
    }

    /// Replay access for the REST events endpoint.
    pub fn events_since(&self, since_seq: u64) -> (Vec<EventRecord>, bool) {
        self.inner
            .lock()
            .map(|i| (i.ring.since(since_seq), i.ring.can_serve(since_seq)))
            .unwrap_or_default()
    }

    /// Apply a status transition and broadcast the new state snapshot.
    /// Returns `false` (and broadcasts nothing) for an illegal transition.
    pub fn set_status(&self, status: SessionStatus) -> bool {
        let changed = {
            let Ok(mut inner) = self.inner.lock() else {
                return false;
            };
            inner.record.transition(status, epoch_ms())
        };
        if changed {
            let record = self.record();
            self.broadcast(ServerMessage::State { session: record });
        }
        changed
    }

    /// Mutate the record under the session lock and broadcast the new state.
    pub fn update_record(&self, f: impl FnOnce(&mut SessionRecord)) {
        {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            f(&mut inner.record);
            inner.record.last_activity = epoch_ms();
        }
        let record = self.record();
        self.broadcast(ServerMessage::State { session: record });
    }

    /// Run `f` against the dedupe cache plus the pending-turn queue.
    pub fn with_turns<T>(
        &self,
        f: impl FnOnce(&mut TurnDedupeCache, &mut VecDeque<PendingTurnStart>) -> T,
    ) -> Option<T> {
        let mut inner = self.inner.lock().ok()?;
        let inner = &mut *inner;
        Some(f(&mut inner.dedupe, &mut inner.pending_turn_starts))
    }

    /// Register an RPC waiter for a command id.
    pub fn register_rpc(&self, id: &str) -> Option<oneshot::Receiver<RpcResponse>> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().ok()?;
        inner.rpc_waiters.insert(id.to_owned(), tx);
        Some(rx)
    }

    /// Resolve (or drop) an RPC waiter.
    pub fn resolve_rpc(&self, id: &str, response: RpcResponse) {
        let waiter = self.inner.lock().ok().and_then(|mut i| i.rpc_waiters.remove(id));
        if let Some(tx) = waiter {
            let _ = tx.send(response);
        }
    }

    pub fn drop_rpc(&self, id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.rpc_waiters.remove(id);
        }
    }

    /// Install the stop-escalation timers; returns false if a stop flow is
    /// already running (no duplicate escalation).
    pub fn begin_stop(&self, flow: StopFlow) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        if inner.stop_flow.is_some() {
            return false;
        }
        inner.stop_flow = Some(flow);
        true
    }

    /// Cancel and clear the stop flow, if any. Returns whether one existed.
    pub fn clear_stop(&self) -> bool {
        let flow = self.inner.lock().ok().and_then(|mut i| i.stop_flow.take());
        match flow {
            Some(flow) => {
                flow.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stopping(&self) -> bool {
        self.inner.lock().map(|i| i.stop_flow.is_some()).unwrap_or(false)
    }

    /// Teardown: cancel timers, drop waiters and subscribers. The caller
    /// broadcasts `session_ended` first.
    pub fn teardown(&self) {
        let waiters: Vec<oneshot::Sender<RpcResponse>> = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if let Some(flow) = inner.stop_flow.take() {
                flow.cancel();
            }
            inner.subscribers.clear();
            inner.rpc_waiters.drain().map(|(_, tx)| tx).collect()
        };
        drop(waiters); // dropping the senders errors the awaiting RPCs
    }

    /// Non-lifecycle agent events route through here (set by the manager's
    /// reader loop); kept on ActiveSession so tests can drive it directly.
    pub fn note_token_usage(&self, input: u64, output: u64, cost: f64) {
        self.update_record(|record| {
            record.tokens.input += input;
            record.tokens.output += output;
            record.cost += cost;
        });
    }

    pub fn note_message(&self) {
        self.update_record(|record| record.message_count += 1);
    }

    /// Append a tool-output delta for the REST accessor.
    pub fn note_tool_output(&self, tool_call_id: &str, delta: &str) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if !inner.tool_outputs.contains_key(tool_call_id)
            && inner.tool_outputs.len() >= TOOL_OUTPUT_KEEP
        {
            inner.tool_outputs.shift_remove_index(0);
        }
        inner
            .tool_outputs
            .entry(tool_call_id.to_owned())
            .or_default()
            .push_str(delta);
    }

    /// Accumulated output for one tool call, if still retained.
    pub fn tool_output(&self, tool_call_id: &str) -> Option<String> {
        self.inner.lock().ok()?.tool_outputs.get(tool_call_id).cloned()
    }
}

#[cfg(test)]
#[path = "active_tests.rs"]
mod tests;

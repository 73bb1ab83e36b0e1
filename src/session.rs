//! Per-client session state machine.
//!
//! A session bridges two worlds that disagree about pacing: the client's
//! short-lived, possibly out-of-order POST exchanges, and an upstream stream
//! consumer that reads and writes one element at a time. Four cooperating
//! tasks, spawned at construction, do the translation:
//!
//! ```text
//! process() ──► process loop ──► buffer loop ──► element()
//!                   │  (orders by rid,  (one-slot hand-off
//!                   │   fills the        + overflow fifo)
//!                   ▼   hold pool)
//!               hold pool ◄────────────── flush loop ◄── response loop ◄── write()
//!                   (held long polls)      (pairs batch    (exponential
//!                                           with a poll)    batching)
//! ```
//!
//! All cross-task traffic runs over bounded channels. The `exit` channel is
//! never sent on; closing it is the broadcast terminal signal, raised by
//! [`Session::close`], by the inactivity timer, or by a client terminate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};

use crate::body::{BodyKind, Condition};
use crate::element::Element;
use crate::error::StreamError;
use crate::request::{AckFn, Request};

/// Timeout the response loop arms when the first element of a batch arrives;
/// each further element halves it.
const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Timeout the response loop starts from while no batch is forming.
const IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Soft target for elements accumulated before a flush; the halving schedule
/// flushes well before a batch grows much past this.
const BATCH_TARGET: usize = 10;

/// A handle to one client's session.
///
/// Handles are cheap clones over shared state; the register, the HTTP front,
/// and the transport adapter all hold the same session.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    sid: String,
    wait: Duration,
    inactivity: Duration,

    /// Highest contiguously processed request id.
    ack: AtomicU64,

    /// Set by the process task when the inactivity timer fires. Read by the
    /// register, which tolerates a briefly stale `false`.
    expired: AtomicBool,

    processor_tx: Sender<Request>,
    responder_tx: Sender<Element>,
    elements_rx: Receiver<Element>,
    restart_rx: Receiver<()>,

    // Never sent on; closing it is the terminal broadcast.
    exit_tx: Sender<()>,
    exit_rx: Receiver<()>,
}

impl Session {
    /// Create a session and spawn its tasks.
    ///
    /// `rid` is the request id of the creating exchange (the next one the
    /// session expects), `hold` the number of requests it may keep open.
    #[must_use]
    pub fn new(
        sid: impl Into<String>,
        rid: u64,
        hold: usize,
        wait: Duration,
        inactivity: Duration,
    ) -> Self {
        let (processor_tx, processor_rx) = async_channel::bounded(1);
        let (responder_tx, responder_rx) = async_channel::bounded(1);
        let (elements_tx, elements_rx) = async_channel::bounded(1);
        let (restart_tx, restart_rx) = async_channel::bounded(1);
        let (exit_tx, exit_rx) = async_channel::bounded(1);
        let (buffer_tx, buffer_rx) = async_channel::bounded(1);
        let (batch_tx, batch_rx) = async_channel::bounded(1);
        // Capacity zero is not a thing; a hold of zero short-circuits in the
        // process loop instead, so the pool itself can stay at least one deep.
        let (hold_tx, hold_rx) = async_channel::bounded(hold.max(1));

        let session = Self {
            inner: Arc::new(Inner {
                sid: sid.into(),
                wait,
                inactivity,
                ack: AtomicU64::new(0),
                expired: AtomicBool::new(false),
                processor_tx,
                responder_tx,
                elements_rx,
                restart_rx,
                exit_tx,
                exit_rx,
            }),
        };

        tokio::spawn(session.clone().process_loop(
            rid,
            hold,
            processor_rx,
            hold_tx,
            hold_rx.clone(),
            restart_tx,
            buffer_tx,
        ));
        tokio::spawn(session.clone().buffer_loop(buffer_rx, elements_tx));
        tokio::spawn(session.clone().response_loop(responder_rx, batch_tx));
        tokio::spawn(session.clone().flush_loop(batch_rx, hold_rx));

        session
    }

    /// The session id.
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.inner.sid
    }

    /// The wait ceiling negotiated for this session's requests.
    #[must_use]
    pub fn wait(&self) -> Duration {
        self.inner.wait
    }

    /// Whether the session died of inactivity.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.inner.expired.load(Ordering::Acquire)
    }

    /// Highest contiguously processed request id.
    #[must_use]
    pub fn ack(&self) -> u64 {
        self.inner.ack.load(Ordering::Acquire)
    }

    /// A callback yielding [`Session::ack`], for stamping responses at
    /// finalize time.
    #[must_use]
    pub fn ack_callback(&self) -> AckFn {
        let inner = Arc::clone(&self.inner);
        Arc::new(move || inner.ack.load(Ordering::Acquire))
    }

    /// Hand an inbound request to the session.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] if the session has exited.
    pub async fn process(&self, request: Request) -> Result<(), StreamError> {
        tokio::select! {
            biased;
            _ = self.exited() => Err(StreamError::Closed),
            sent = self.inner.processor_tx.send(request) => {
                sent.map_err(|_| StreamError::Closed)
            }
        }
    }

    /// Queue an element for delivery to the client.
    ///
    /// The element joins the current batch; the response loop decides when
    /// the batch meets a held request.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] if the session has exited.
    pub async fn write(&self, el: Element) -> Result<(), StreamError> {
        tokio::select! {
            biased;
            _ = self.exited() => Err(StreamError::Closed),
            sent = self.inner.responder_tx.send(el) => {
                sent.map_err(|_| StreamError::Closed)
            }
        }
    }

    /// The next client-sent element, in request-id order.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::RequireRestart`] once per accepted restart
    /// request, and [`StreamError::Closed`] after exit.
    pub async fn element(&self) -> Result<Element, StreamError> {
        tokio::select! {
            biased;
            _ = self.exited() => Err(StreamError::Closed),
            restart = self.inner.restart_rx.recv() => match restart {
                Ok(()) => Err(StreamError::RequireRestart),
                Err(_) => Err(StreamError::Closed),
            },
            el = self.inner.elements_rx.recv() => el.map_err(|_| StreamError::Closed),
        }
    }

    /// Request termination. Idempotent; returns whether this call won the
    /// race to close the session.
    pub fn close(&self) -> bool {
        self.inner.exit_tx.close()
    }

    /// Resolves once the session has exited.
    async fn exited(&self) {
        // The exit channel is never sent on, so recv only returns (with a
        // closed error) once the channel is closed.
        let _ = self.inner.exit_rx.recv().await;
    }

    /// Ingress ordering: registers arrivals, keeps the hold pool topped up,
    /// raises restarts, and advances in-order reassembly. Owns `current` and
    /// the pending map; also the session's inactivity watchdog.
    #[allow(clippy::too_many_arguments)]
    async fn process_loop(
        self,
        mut current: u64,
        hold: usize,
        processor_rx: Receiver<Request>,
        hold_tx: Sender<Request>,
        hold_rx: Receiver<Request>,
        restart_tx: Sender<()>,
        buffer_tx: Sender<Element>,
    ) {
        let mut pending: HashMap<u64, Request> = HashMap::new();

        loop {
            let request = tokio::select! {
                biased;
                _ = self.exited() => break,
                request = processor_rx.recv() => match request {
                    Ok(request) => request,
                    Err(_) => break,
                },
                () = tokio::time::sleep(self.inner.inactivity) => {
                    tracing::info!(sid = %self.inner.sid, "session expired after inactivity");
                    self.inner.expired.store(true, Ordering::Release);
                    self.close();
                    break;
                }
            };

            let rid = request.rid();
            if rid < current {
                // Replay of an already-answered request id. The response
                // cache BOSH allows for re-requests is deliberately not kept.
                tracing::debug!(sid = %self.inner.sid, rid, current, "rejecting replayed request id");
                request.reject(Condition::ItemNotFound);
                continue;
            }

            tracing::debug!(sid = %self.inner.sid, rid, "processing request");
            pending.insert(rid, request.clone());

            let terminating = request.body().kind == Some(BodyKind::Terminate);
            if !terminating {
                if hold == 0 {
                    // Nothing may be held open; the request returns as soon
                    // as it has been accounted for.
                    request.close();
                } else if let Err(TrySendError::Full(incoming)) =
                    hold_tx.try_send(request.clone())
                {
                    if let Ok(oldest) = hold_rx.try_recv() {
                        tracing::debug!(
                            sid = %self.inner.sid,
                            rid = oldest.rid(),
                            "displacing oldest held request"
                        );
                        oldest.close();
                    }
                    let _ = hold_tx.try_send(incoming);
                }

                if request.body().restart {
                    tracing::debug!(sid = %self.inner.sid, "stream restart requested");
                    let _ = restart_tx.try_send(());
                }
            }

            while let Some(next) = pending.remove(&current) {
                self.inner.ack.store(current, Ordering::Release);
                for el in next.elements() {
                    if buffer_tx.send(el.clone()).await.is_err() {
                        return;
                    }
                }
                current += 1;
            }

            if terminating {
                tracing::info!(sid = %self.inner.sid, rid, "client terminated session");
                request.terminate();
                self.close();
                break;
            }
        }

        // Unblock producers promptly; process() fails over to StreamClosed.
        processor_rx.close();
        restart_tx.close();
    }

    /// One-slot hand-off between the process loop and the consumer. The
    /// process loop must never block on the consumer's read latency, and the
    /// consumer must see elements in arrival order.
    async fn buffer_loop(self, buffer_rx: Receiver<Element>, elements_tx: Sender<Element>) {
        let mut overflow: VecDeque<Element> = VecDeque::new();
        let mut slot: Option<Element> = None;

        loop {
            match slot.take() {
                Some(el) => {
                    tokio::select! {
                        biased;
                        _ = self.exited() => break,
                        sent = elements_tx.send(el.clone()) => {
                            if sent.is_err() {
                                break;
                            }
                            slot = overflow.pop_front();
                        }
                        next = buffer_rx.recv() => {
                            slot = Some(el);
                            match next {
                                Ok(next) => overflow.push_back(next),
                                Err(_) => break,
                            }
                        }
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        _ = self.exited() => break,
                        next = buffer_rx.recv() => match next {
                            Ok(next) => slot = Some(next),
                            Err(_) => break,
                        },
                    }
                }
            }
        }

        buffer_rx.close();
        elements_tx.close();
    }

    /// Egress batching: accumulates upstream elements and hands batches to
    /// the flush loop on an exponentially decaying schedule. The first
    /// element of a batch arms a 50 ms timeout, each further element halves
    /// it; a fire with an empty batch backs the timeout off instead.
    async fn response_loop(self, responder_rx: Receiver<Element>, batch_tx: Sender<Vec<Element>>) {
        let mut batch: Vec<Element> = Vec::with_capacity(BATCH_TARGET);
        let mut timeout = IDLE_INTERVAL;

        loop {
            tokio::select! {
                biased;
                _ = self.exited() => break,
                el = responder_rx.recv() => {
                    let Ok(el) = el else { break };
                    batch.push(el);
                    timeout = if batch.len() == 1 {
                        FLUSH_INTERVAL
                    } else {
                        timeout / 2
                    };
                    // The target is soft: when no flush slot is free the
                    // batch keeps growing past it.
                    if batch.len() >= BATCH_TARGET {
                        match batch_tx.try_send(std::mem::take(&mut batch)) {
                            Ok(()) => timeout = FLUSH_INTERVAL,
                            Err(TrySendError::Full(returned))
                            | Err(TrySendError::Closed(returned)) => batch = returned,
                        }
                    }
                }
                () = tokio::time::sleep(timeout) => {
                    if batch.is_empty() {
                        // Back off, but never below the flush interval: the
                        // halving above can drive the timeout to zero.
                        timeout = timeout.max(FLUSH_INTERVAL).saturating_mul(2);
                        continue;
                    }
                    match batch_tx.try_send(std::mem::take(&mut batch)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(returned)) => {
                            // No held request took the previous batch yet;
                            // keep accumulating and try again shortly.
                            batch = returned;
                            timeout = FLUSH_INTERVAL;
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
            }
        }

        responder_rx.close();
        batch_tx.close();
    }

    /// Pairs batches with held requests, skipping requests that timed out or
    /// were displaced while waiting. On exit, drains the pool so every held
    /// request still writes its (empty) response.
    async fn flush_loop(self, batch_rx: Receiver<Vec<Element>>, hold_rx: Receiver<Request>) {
        'pairs: loop {
            let batch = tokio::select! {
                biased;
                _ = self.exited() => break 'pairs,
                batch = batch_rx.recv() => match batch {
                    Ok(batch) => batch,
                    Err(_) => break 'pairs,
                },
            };

            loop {
                let request = tokio::select! {
                    biased;
                    _ = self.exited() => break 'pairs,
                    request = hold_rx.recv() => match request {
                        Ok(request) => request,
                        Err(_) => break 'pairs,
                    },
                };
                match request.write(batch.clone()) {
                    Ok(()) => break,
                    Err(_) => {
                        tracing::debug!(
                            sid = %self.inner.sid,
                            rid = request.rid(),
                            "skipping spent held request"
                        );
                    }
                }
            }
        }

        batch_rx.close();
        hold_rx.close();
        while let Ok(request) = hold_rx.try_recv() {
            request.close();
        }
    }
}

//! A single in-flight HTTP exchange.
//!
//! A [`Request`] is created by the HTTP front when a body arrives and handed
//! to the owning session. It leaves the pending state exactly once, through
//! one of three doors: the session's flush loop writes a payload into it, the
//! session displaces or drains it ([`Request::close`]), or its `wait`
//! deadline passes. [`Request::handle`] then renders exactly one response
//! body.
//!
//! Handles are cheap clones over shared interior state, so the HTTP task can
//! await `handle` while the session keeps its own copy queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::body::{Body, BodyKind, Condition};
use crate::element::Element;
use crate::error::RequestClosed;

/// Callback supplying the highest request id the owning session has
/// processed, invoked when a response is finalized.
pub type AckFn = Arc<dyn Fn() -> u64 + Send + Sync>;

/// One client POST awaiting its response.
#[derive(Clone)]
pub struct Request {
    inner: Arc<Inner>,
}

struct Inner {
    rid: u64,
    sid: String,
    wait: Duration,
    body: Body,
    response: Mutex<Body>,
    payload: Mutex<Vec<Element>>,
    spent: AtomicBool,
    ack: AckFn,

    // Close-as-broadcast signals: never sent on, only closed.
    proceed: (async_channel::Sender<()>, async_channel::Receiver<()>),
    closed: (async_channel::Sender<()>, async_channel::Receiver<()>),
}

impl Request {
    /// Create a request for the given inbound `body`, with `response` as the
    /// template the eventual response body starts from.
    #[must_use]
    pub fn new(
        rid: u64,
        wait: Duration,
        sid: impl Into<String>,
        body: Body,
        response: Body,
        ack: AckFn,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                rid,
                sid: sid.into(),
                wait,
                body,
                response: Mutex::new(response),
                payload: Mutex::new(Vec::new()),
                spent: AtomicBool::new(false),
                ack,
                proceed: async_channel::bounded(1),
                closed: async_channel::bounded(1),
            }),
        }
    }

    /// The request id of this exchange.
    #[must_use]
    pub fn rid(&self) -> u64 {
        self.inner.rid
    }

    /// The session id this exchange belongs to.
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.inner.sid
    }

    /// The inbound body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.inner.body
    }

    /// The child elements the client sent in this request.
    #[must_use]
    pub fn elements(&self) -> &[Element] {
        &self.inner.body.children
    }

    /// Whether the request has left the pending state.
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.inner.spent.load(Ordering::Acquire)
    }

    /// Record `els` as the response payload and release `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestClosed`] if the request is already spent; the caller
    /// should move on to another held request.
    pub fn write(&self, els: Vec<Element>) -> Result<(), RequestClosed> {
        if self.inner.spent.swap(true, Ordering::AcqRel) {
            return Err(RequestClosed);
        }
        *lock(&self.inner.payload) = els;
        self.inner.proceed.0.close();
        Ok(())
    }

    /// Release `handle` with an empty payload.
    ///
    /// Used when the request is displaced by a newer long poll or drained on
    /// session exit. Idempotent.
    pub fn close(&self) {
        self.inner.closed.0.close();
    }

    /// Release `handle` with a terminate response carrying `condition`.
    pub(crate) fn reject(&self, condition: Condition) {
        self.finish_terminate(Some(condition));
    }

    /// Release `handle` with a plain terminate response.
    pub(crate) fn terminate(&self) {
        self.finish_terminate(None);
    }

    fn finish_terminate(&self, condition: Option<Condition>) {
        if self.inner.spent.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut response = lock(&self.inner.response);
            response.kind = Some(BodyKind::Terminate);
            response.condition = condition;
        }
        self.inner.proceed.0.close();
    }

    /// Wait for the request to be released, then render its one response.
    ///
    /// Blocks until a write, a close, or the `wait` deadline, whichever comes
    /// first; stamps the session's processed high-water mark into the
    /// response `ack`, moves the payload into the response children, and
    /// returns the rendered bytes. Called exactly once per request.
    pub async fn handle(&self) -> Vec<u8> {
        tokio::select! {
            biased;
            _ = self.inner.proceed.1.recv() => {}
            _ = self.inner.closed.1.recv() => {
                self.inner.spent.store(true, Ordering::Release);
            }
            () = tokio::time::sleep(self.inner.wait) => {
                tracing::debug!(sid = %self.inner.sid, rid = self.inner.rid, "request wait elapsed");
                self.inner.spent.store(true, Ordering::Release);
            }
        }

        let ack = (self.inner.ack)();
        let mut response = lock(&self.inner.response).clone();
        response.ack = if ack == 0 { None } else { Some(ack) };
        response.children = std::mem::take(&mut *lock(&self.inner.payload));
        response.to_element().to_bytes()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("rid", &self.inner.rid)
            .field("sid", &self.inner.sid)
            .field("spent", &self.is_spent())
            .finish_non_exhaustive()
    }
}

// Lock poisoning only happens if a holder panicked; these critical sections
// contain no panicking code.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

//! Transport adapter for the upstream stream consumer.
//!
//! The upstream stream wants a plain read-one/write-one interface and knows
//! nothing about requests, holds, or batching. [`BoshTransport`] is that
//! interface: a thin shim over [`Session::element`], [`Session::write`], and
//! [`Session::close`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::element::Element;
use crate::error::StreamError;
use crate::session::Session;

/// The contract a stream consumer drives a transport through.
///
/// `start` is called once when the stream first runs and again after every
/// restart the client negotiates (around SASL and bind).
pub trait StreamTransport: Send + Sync {
    /// The next inbound element, in order.
    fn next(&self) -> impl Future<Output = Result<Element, StreamError>> + Send;

    /// Queue an element for delivery to the client.
    fn write_element(&self, el: Element) -> impl Future<Output = Result<(), StreamError>> + Send;

    /// Queue a stanza for delivery to the client.
    fn write_stanza<S: Into<Element> + Send>(
        &self,
        stanza: S,
    ) -> impl Future<Output = Result<(), StreamError>> + Send;

    /// Start or restart the stream. Returns whether the transport is
    /// natively secure.
    fn start(&self) -> impl Future<Output = Result<bool, StreamError>> + Send;

    /// Tear the transport down.
    fn close(&self);
}

/// [`StreamTransport`] over a BOSH session.
#[derive(Debug)]
pub struct BoshTransport {
    session: Session,
    started: AtomicBool,
}

impl BoshTransport {
    /// Wrap a session.
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            session,
            started: AtomicBool::new(false),
        }
    }

    /// The underlying session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl StreamTransport for BoshTransport {
    fn next(&self) -> impl Future<Output = Result<Element, StreamError>> + Send {
        self.session.element()
    }

    fn write_element(&self, el: Element) -> impl Future<Output = Result<(), StreamError>> + Send {
        tracing::debug!(sid = %self.session.sid(), element = %el, "writing element");
        self.session.write(el)
    }

    fn write_stanza<S: Into<Element> + Send>(
        &self,
        stanza: S,
    ) -> impl Future<Output = Result<(), StreamError>> + Send {
        self.write_element(stanza.into())
    }

    fn start(&self) -> impl Future<Output = Result<bool, StreamError>> + Send {
        async move {
            if self.started.swap(true, Ordering::AcqRel) {
                // A restart: hold until the client signals it.
                match self.session.element().await {
                    Err(StreamError::RequireRestart) => {}
                    Err(StreamError::Closed) => return Err(StreamError::Closed),
                    Ok(el) => {
                        tracing::warn!(
                            sid = %self.session.sid(),
                            element = %el,
                            "expected a stream restart"
                        );
                    }
                }
            }
            // BOSH itself is never secure; TLS belongs to the HTTP layer.
            Ok(false)
        }
    }

    fn close(&self) {
        self.session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::request::Request;
    use std::time::Duration;

    fn session() -> Session {
        Session::new(
            "bo8sh",
            1,
            2,
            Duration::from_secs(5),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn first_start_returns_immediately() {
        let transport = BoshTransport::new(session());
        assert_eq!(transport.start().await, Ok(false));
        transport.close();
    }

    #[tokio::test]
    async fn restart_waits_for_the_restart_signal() {
        let s = session();
        let transport = BoshTransport::new(s.clone());
        assert_eq!(transport.start().await, Ok(false));

        let body = Body {
            rid: Some(1),
            restart: true,
            ..Body::default()
        };
        let r = Request::new(
            1,
            Duration::from_secs(5),
            s.sid().to_owned(),
            body,
            Body::default(),
            s.ack_callback(),
        );
        s.process(r).await.expect("process");

        assert_eq!(transport.start().await, Ok(false));
        transport.close();
    }

    #[tokio::test]
    async fn start_reports_closure() {
        let s = session();
        let transport = BoshTransport::new(s.clone());
        assert_eq!(transport.start().await, Ok(false));
        s.close();
        assert_eq!(transport.start().await, Err(StreamError::Closed));
    }

    #[tokio::test]
    async fn next_and_write_shim_the_session() {
        let s = session();
        let transport = BoshTransport::new(s.clone());

        let body = Body {
            rid: Some(1),
            children: vec![Element::new("auth")],
            ..Body::default()
        };
        let r = Request::new(
            1,
            Duration::from_secs(5),
            s.sid().to_owned(),
            body,
            Body::default(),
            s.ack_callback(),
        );
        s.process(r.clone()).await.expect("process");

        assert_eq!(transport.next().await, Ok(Element::new("auth")));

        transport
            .write_element(Element::new("success"))
            .await
            .expect("write");
        let response = r.handle().await;
        let el = Element::parse(&response).expect("response element");
        assert_eq!(
            el.child_elements().cloned().collect::<Vec<_>>(),
            vec![Element::new("success")]
        );
        transport.close();
    }

    #[tokio::test]
    async fn stanzas_write_as_elements() {
        let s = session();
        let transport = BoshTransport::new(s.clone());

        let held = Request::new(
            1,
            Duration::from_secs(5),
            s.sid().to_owned(),
            Body {
                rid: Some(1),
                ..Body::default()
            },
            Body::default(),
            s.ack_callback(),
        );
        s.process(held.clone()).await.expect("process");

        let stanza = Element::new("message").attr("to", "romeo@montague.lit");
        transport.write_stanza(stanza.clone()).await.expect("write");

        let response = held.handle().await;
        let el = Element::parse(&response).expect("response element");
        assert_eq!(el.child_elements().cloned().collect::<Vec<_>>(), vec![stanza]);
        transport.close();
    }
}

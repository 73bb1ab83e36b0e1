//! HTTP front for the BOSH transport.
//!
//! One endpoint accepts POSTed `<body/>` documents and nothing else. The
//! handler frames the body, negotiates new sessions, and dispatches requests
//! into their session; every client-visible failure is answered with a
//! terminate body at 200, because a terminate body is the only thing a BOSH
//! client can parse.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tracing::{debug, info, warn};

use crate::body::{Body, Condition};
use crate::element::Element;
use crate::register::Register;
use crate::request::Request;
use crate::session::Session;
use crate::{DEFAULT_INACTIVITY, DEFAULT_MAX_BODY_SIZE, DEFAULT_WAIT};

/// Shared state behind the BOSH endpoint.
///
/// Negotiation runs against a configurable defaulting [`Body`]; there are no
/// global defaults.
#[derive(Debug, Clone)]
pub struct BoshHandler {
    register: Register,
    defaults: Body,
    domain: String,
    max_body_size: usize,
}

impl BoshHandler {
    /// Create a handler with the stock server defaults.
    #[must_use]
    pub fn new(register: Register) -> Self {
        Self {
            register,
            defaults: Body::server_defaults(),
            domain: "localhost".to_owned(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Set the domain announced in the `to` attribute of session-creation
    /// responses.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Replace the defaulting body negotiation clamps against.
    #[must_use]
    pub fn with_defaults(mut self, defaults: Body) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set the maximum accepted request body size.
    #[must_use]
    pub const fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Access the session register.
    #[must_use]
    pub const fn register(&self) -> &Register {
        &self.register
    }

    async fn create_session(&self, body: Body, rid: u64) -> Response {
        let sid = generate_sid();
        let mut response = negotiate(&body, &self.defaults, &self.domain);
        response.sid = Some(sid.clone());

        let hold = response.hold.unwrap_or(0) as usize;
        let wait = response.wait.unwrap_or(DEFAULT_WAIT);
        let inactivity = response.inactivity.unwrap_or(DEFAULT_INACTIVITY);

        let session = Session::new(sid.clone(), rid, hold, wait, inactivity);
        self.register.add(sid.clone(), session.clone()).await;
        info!(sid = %sid, rid, hold, "session created");

        let request = Request::new(rid, wait, sid, body, response, session.ack_callback());
        self.dispatch(&session, request).await
    }

    async fn existing_session(&self, sid: String, body: Body, rid: u64) -> Response {
        let Ok(session) = self.register.lookup(&sid).await else {
            debug!(sid = %sid, rid, "request for unknown session");
            return terminate(Condition::ItemNotFound);
        };

        let request = Request::new(
            rid,
            session.wait(),
            sid,
            body,
            Body::default(),
            session.ack_callback(),
        );
        self.dispatch(&session, request).await
    }

    async fn dispatch(&self, session: &Session, request: Request) -> Response {
        if session.process(request.clone()).await.is_err() {
            warn!(sid = %session.sid(), rid = request.rid(), "session exited mid-dispatch");
            return terminate(Condition::InternalServerError);
        }
        xml_response(request.handle().await)
    }
}

/// Build the router: one POST endpoint, everything else 405.
#[must_use]
pub fn router(handler: Arc<BoshHandler>) -> Router {
    Router::new().route("/", post(handle_body)).with_state(handler)
}

async fn handle_body(
    State(handler): State<Arc<BoshHandler>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let bytes = match body {
        Ok(bytes) => bytes,
        Err(rejection) => {
            // The session (if any) was never touched; there is nothing a
            // terminate body could tell the client.
            warn!(error = %rejection, "failed to read request body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if bytes.len() > handler.max_body_size {
        warn!(size = bytes.len(), "oversized request body");
        return terminate(Condition::PolicyViolation);
    }

    let el = match Element::parse(&bytes) {
        Ok(el) => el,
        Err(error) => {
            warn!(%error, "malformed request body");
            return terminate(Condition::BadRequest);
        }
    };
    if el.name != "body" {
        warn!(root = %el.name, "root element is not a body");
        return terminate(Condition::BadRequest);
    }

    let body = Body::parse(&el, &handler.defaults);
    let Some(rid) = body.rid else {
        warn!("body without a usable rid");
        return terminate(Condition::BadRequest);
    };

    match body.sid.clone() {
        None => handler.create_session(body, rid).await,
        Some(sid) => handler.existing_session(sid, body, rid).await,
    }
}

/// Clamp the client's session-creation offer against the server defaults.
fn negotiate(body: &Body, defaults: &Body, domain: &str) -> Body {
    Body {
        to: Some(domain.to_owned()),
        ack: body.rid,
        wait: min_opt(body.wait, defaults.wait),
        ver: min_opt(body.ver, defaults.ver),
        xmpp_ver: min_opt(body.xmpp_ver, defaults.xmpp_ver),
        requests: match body.hold {
            Some(hold) => min_opt(Some(hold.saturating_add(1)), defaults.requests),
            None => defaults.requests,
        },
        hold: match (body.hold, defaults.hold) {
            (Some(offered), Some(most)) if offered <= most => Some(offered),
            (_, most) => most,
        },
        polling: defaults.polling,
        inactivity: defaults.inactivity,
        max_pause: defaults.max_pause,
        restart_logic: defaults.restart_logic,
        ..Body::default()
    }
}

/// The lower of two optional values, or whichever is present.
fn min_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Mint a session id: sixteen random bytes with the RFC 4122 version and
/// variant bits forced, rendered as `bo<hex>sh`.
fn generate_sid() -> String {
    let mut id = [0u8; 16];
    #[allow(clippy::expect_used)]
    getrandom::getrandom(&mut id).expect("system rng unavailable");

    id[8] = (id[8] | 0x80) & 0xBF;
    id[6] = (id[6] | 0x40) & 0x4F;

    let mut sid = String::with_capacity(36);
    sid.push_str("bo");
    for byte in &id {
        let _ = write!(sid, "{byte:02x}");
    }
    sid.push_str("sh");
    sid
}

fn xml_response(bytes: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
        bytes,
    )
        .into_response()
}

fn terminate(condition: Condition) -> Response {
    xml_response(Body::terminate(condition).to_element().to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use std::time::Duration;

    #[test]
    fn sids_are_bo_hex_sh() {
        let sid = generate_sid();
        assert_eq!(sid.len(), 36);
        assert!(sid.starts_with("bo"));
        assert!(sid.ends_with("sh"));
        let hex = &sid[2..34];
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // Version and variant nibbles are pinned.
        assert_eq!(&hex[12..13], "4");
        assert!(matches!(&hex[16..17], "8" | "9" | "a" | "b"));
    }

    #[test]
    fn sids_are_unique() {
        assert_ne!(generate_sid(), generate_sid());
    }

    #[test]
    fn negotiation_clamps_against_the_defaults() {
        let offer = Body {
            rid: Some(100),
            wait: Some(Duration::from_secs(60)),
            hold: Some(1),
            ver: Some(Version::new(1, 6)),
            xmpp_ver: Some(Version::new(1, 0)),
            ..Body::default()
        };
        let response = negotiate(&offer, &Body::server_defaults(), "example.net");

        assert_eq!(response.to.as_deref(), Some("example.net"));
        assert_eq!(response.ack, Some(100));
        assert_eq!(response.wait, Some(Duration::from_secs(45)));
        assert_eq!(response.requests, Some(2));
        assert_eq!(response.hold, Some(1));
        assert_eq!(response.ver, Some(Version::new(1, 6)));
        assert_eq!(response.xmpp_ver, Some(Version::new(1, 0)));
        assert_eq!(response.polling, Some(Duration::from_secs(5)));
        assert_eq!(response.inactivity, Some(Duration::from_secs(75)));
        assert_eq!(response.max_pause, Some(Duration::from_secs(120)));
        assert!(response.restart_logic);
    }

    #[test]
    fn negotiation_keeps_a_modest_hold() {
        let defaults = Body::server_defaults();

        let greedy = Body {
            hold: Some(50),
            ..Body::default()
        };
        assert_eq!(negotiate(&greedy, &defaults, "x").hold, defaults.hold);

        let absent = Body::default();
        assert_eq!(negotiate(&absent, &defaults, "x").hold, defaults.hold);
        assert_eq!(
            negotiate(&absent, &defaults, "x").requests,
            defaults.requests
        );

        let zero = Body {
            hold: Some(0),
            ..Body::default()
        };
        assert_eq!(negotiate(&zero, &defaults, "x").hold, Some(0));
        assert_eq!(negotiate(&zero, &defaults, "x").requests, Some(1));
    }

    #[test]
    fn min_opt_prefers_present_values() {
        assert_eq!(min_opt(Some(3), Some(5)), Some(3));
        assert_eq!(min_opt(Some(5), Some(3)), Some(3));
        assert_eq!(min_opt(None, Some(3)), Some(3));
        assert_eq!(min_opt::<u64>(None, None), None);
    }
}

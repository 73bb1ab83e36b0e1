//! # BOSH transport
//!
//! Server-side BOSH (Bidirectional-streams Over Synchronous HTTP,
//! XEP-0124/XEP-0206): a long-lived bidirectional XML stream emulated over
//! short-lived HTTP request/response exchanges.
//!
//! The interesting part is not the HTTP plumbing but the session machinery
//! in between:
//!
//! | Piece | Purpose |
//! |-------------------------|----------------------------------------------------|
//! | [`server::BoshHandler`] | Frames bodies, negotiates sessions, dispatches     |
//! | [`session::Session`]    | Orders requests, holds long polls, batches output  |
//! | [`request::Request`]    | One POST exchange: held open, answered exactly once|
//! | [`register::Register`]  | sid → session, with stream lifecycle hooks         |
//! | [`transport::BoshTransport`] | Read-one/write-one adapter for the upstream stream |
//!
//! Inbound, a POSTed `<body/>` becomes a typed [`body::Body`], enters its
//! [`session::Session`], and its children surface in order through
//! [`transport::StreamTransport::next`]. Outbound, elements written by the
//! upstream stream are batched and delivered through whichever request the
//! session is currently holding open.

pub mod body;
pub mod element;
pub mod error;
pub mod register;
pub mod request;
pub mod server;
pub mod session;
pub mod transport;
pub mod version;

use std::time::Duration;

use crate::version::Version;

/// The BOSH content namespace.
pub const NS_BOSH: &str = "http://jabber.org/protocol/httpbind";

/// The XMPP-over-BOSH profile namespace (`xmpp:` attributes).
pub const NS_XMPP: &str = "urn:xmpp:xbosh";

/// The XMPP streams namespace (`stream:` children).
pub const NS_STREAM: &str = "http://etherx.jabber.org/streams";

/// Default ceiling on how long a request may be held (`wait`).
pub const DEFAULT_WAIT: Duration = Duration::from_secs(45);

/// Default number of requests held open for server push (`hold`).
pub const DEFAULT_HOLD: u64 = 3;

/// Default cap on simultaneous requests (`requests`).
pub const DEFAULT_REQUESTS: u64 = 2;

/// Default shortest polling interval (`polling`).
pub const DEFAULT_POLLING: Duration = Duration::from_secs(5);

/// Default quiet period after which a session expires (`inactivity`).
pub const DEFAULT_INACTIVITY: Duration = Duration::from_secs(75);

/// Default longest client-requested pause (`maxpause`).
pub const DEFAULT_MAX_PAUSE: Duration = Duration::from_secs(120);

/// Default BOSH protocol version (`ver`).
pub const DEFAULT_VER: Version = Version::new(1, 6);

/// Default XMPP profile version (`xmpp:version`).
pub const DEFAULT_XMPP_VER: Version = Version::new(1, 0);

/// Default stream language (`xml:lang`).
pub const DEFAULT_LANG: &str = "en";

/// Default response content type (`content`).
pub const DEFAULT_CONTENT: &str = "text/xml; charset=utf8";

/// Default maximum accepted request body size in bytes.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

//! Typed view of a BOSH `<body/>` element.
//!
//! A [`Body`] is the immutable image of one wire body: parsing fills fields
//! from same-named attributes (falling back to a defaulting `Body` for
//! missing or malformed values), rendering emits only the fields that are
//! present. Optional fields use `Option` rather than wire sentinels, so
//! `hold: None` is "hold absent" while `hold: Some(0)` is an explicit
//! `hold="0"`.

use std::time::Duration;

use crate::element::Element;
use crate::version::Version;
use crate::{
    DEFAULT_CONTENT, DEFAULT_HOLD, DEFAULT_INACTIVITY, DEFAULT_LANG, DEFAULT_MAX_PAUSE,
    DEFAULT_POLLING, DEFAULT_REQUESTS, DEFAULT_VER, DEFAULT_WAIT, DEFAULT_XMPP_VER, NS_BOSH,
    NS_STREAM, NS_XMPP,
};

/// The `type` attribute of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// The sending party is ending the session.
    Terminate,

    /// A recoverable error report.
    Error,
}

impl BodyKind {
    /// The wire form of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Terminate => "terminate",
            Self::Error => "error",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "terminate" => Some(Self::Terminate),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// The `condition` attribute carried by terminate bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// The request was malformed or violated the negotiation.
    BadRequest,

    /// The session id (or a replayed request id) is unknown.
    ItemNotFound,

    /// The client exceeded a negotiated capacity limit.
    PolicyViolation,

    /// The server failed while processing an otherwise valid request.
    InternalServerError,
}

impl Condition {
    /// The wire form of the condition.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::ItemNotFound => "item-not-found",
            Self::PolicyViolation => "policy-violation",
            Self::InternalServerError => "internal-server-error",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "bad-request" => Some(Self::BadRequest),
            "item-not-found" => Some(Self::ItemNotFound),
            "policy-violation" => Some(Self::PolicyViolation),
            "internal-server-error" => Some(Self::InternalServerError),
            _ => None,
        }
    }
}

/// The typed image of one `<body/>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    /// Destination domain (`to`).
    pub to: Option<String>,

    /// Origin address (`from`).
    pub from: Option<String>,

    /// Default language of the stream (`xml:lang`).
    pub lang: Option<String>,

    /// Content encodings the party accepts (`accept`).
    pub accept: Option<String>,

    /// Content type of responses (`content`).
    pub content: Option<String>,

    /// Session id (`sid`); absent on session-creation requests.
    pub sid: Option<String>,

    /// BOSH protocol version (`ver`).
    pub ver: Option<Version>,

    /// XMPP profile version (`xmpp:version`).
    pub xmpp_ver: Option<Version>,

    /// Longest time a request may be held (`wait`, whole seconds).
    pub wait: Option<Duration>,

    /// Shortest allowed polling interval (`polling`, whole seconds).
    pub polling: Option<Duration>,

    /// Longest allowed quiet period (`inactivity`, whole seconds).
    pub inactivity: Option<Duration>,

    /// Longest allowed client-requested pause (`maxpause`, whole seconds).
    pub max_pause: Option<Duration>,

    /// Number of requests the server may hold open (`hold`).
    pub hold: Option<u64>,

    /// Highest request id processed (`ack`).
    pub ack: Option<u64>,

    /// Request id of this exchange (`rid`).
    pub rid: Option<u64>,

    /// Maximum simultaneous requests (`requests`).
    pub requests: Option<u64>,

    /// Whether the server understands stream restarts (`xmpp:restartlogic`).
    pub restart_logic: bool,

    /// Whether this body requests a stream restart (`xmpp:restart`).
    pub restart: bool,

    /// Disposition of the body (`type`).
    pub kind: Option<BodyKind>,

    /// Terminate condition (`condition`).
    pub condition: Option<Condition>,

    /// Child elements, in document order.
    pub children: Vec<Element>,
}

impl Body {
    /// A terminate body carrying the given condition.
    #[must_use]
    pub fn terminate(condition: Condition) -> Self {
        Self {
            kind: Some(BodyKind::Terminate),
            condition: Some(condition),
            ..Self::default()
        }
    }

    /// The defaulting body a server typically negotiates against.
    #[must_use]
    pub fn server_defaults() -> Self {
        Self {
            lang: Some(DEFAULT_LANG.to_owned()),
            content: Some(DEFAULT_CONTENT.to_owned()),
            ver: Some(DEFAULT_VER),
            xmpp_ver: Some(DEFAULT_XMPP_VER),
            wait: Some(DEFAULT_WAIT),
            polling: Some(DEFAULT_POLLING),
            inactivity: Some(DEFAULT_INACTIVITY),
            max_pause: Some(DEFAULT_MAX_PAUSE),
            hold: Some(DEFAULT_HOLD),
            requests: Some(DEFAULT_REQUESTS),
            restart_logic: true,
            ..Self::default()
        }
    }

    /// Build a typed body from a parsed `<body/>` element.
    ///
    /// Missing or malformed numeric, duration, and version attributes fall
    /// back to the corresponding field of `defaults`. `rid` and `ack` are
    /// never defaulted: a body without a usable `rid` is rejected at the
    /// HTTP boundary, not papered over here. A missing `hold` stays `None`
    /// so that "unspecified" and an explicit `hold="0"` remain distinct.
    #[must_use]
    pub fn parse(el: &Element, defaults: &Self) -> Self {
        Self {
            to: attr_string(el, "to"),
            from: attr_string(el, "from"),
            lang: attr_string(el, "xml:lang").or_else(|| defaults.lang.clone()),
            accept: attr_string(el, "accept").or_else(|| defaults.accept.clone()),
            content: attr_string(el, "content").or_else(|| defaults.content.clone()),
            sid: attr_string(el, "sid"),
            ver: attr_parse(el, "ver").or(defaults.ver),
            xmpp_ver: attr_parse(el, "xmpp:version").or(defaults.xmpp_ver),
            wait: attr_seconds(el, "wait").or(defaults.wait),
            polling: attr_seconds(el, "polling").or(defaults.polling),
            inactivity: attr_seconds(el, "inactivity").or(defaults.inactivity),
            max_pause: attr_seconds(el, "maxpause").or(defaults.max_pause),
            hold: match el.attribute("hold") {
                None => None,
                Some(raw) => raw.parse().ok().or(defaults.hold),
            },
            ack: attr_parse(el, "ack"),
            rid: attr_parse(el, "rid"),
            requests: attr_parse(el, "requests").or(defaults.requests),
            restart_logic: el.attribute("xmpp:restartlogic") == Some("true"),
            restart: el.attribute("xmpp:restart") == Some("true"),
            kind: el.attribute("type").and_then(BodyKind::parse),
            condition: el.attribute("condition").and_then(Condition::parse),
            children: el.child_elements().cloned().collect(),
        }
    }

    /// Render the body as a `<body/>` element.
    ///
    /// Only present fields become attributes. The root always declares the
    /// BOSH namespace; emitting any `xmpp:*` attribute also declares the
    /// `xmpp` namespace, and any `stream`-prefixed child declares `stream`.
    #[must_use]
    pub fn to_element(&self) -> Element {
        let mut el = Element::new("body").attr("xmlns", NS_BOSH);
        let mut xmpp_ns = false;
        let mut stream_ns = false;

        if let Some(kind) = self.kind {
            el = el.attr("type", kind.as_str());
        }
        if let Some(condition) = self.condition {
            el = el.attr("condition", condition.as_str());
        }
        if let Some(to) = &self.to {
            el = el.attr("to", to);
        }
        if let Some(from) = &self.from {
            el = el.attr("from", from);
        }
        if let Some(lang) = &self.lang {
            el = el.attr("xml:lang", lang);
        }
        if let Some(ver) = self.ver {
            el = el.attr("ver", ver.to_string());
        }
        if let Some(wait) = self.wait {
            el = el.attr("wait", wait.as_secs().to_string());
        }
        if let Some(xmpp_ver) = self.xmpp_ver {
            el = el.attr("xmpp:version", xmpp_ver.to_string());
            xmpp_ns = true;
        }
        if self.restart_logic {
            el = el.attr("xmpp:restartlogic", "true");
            xmpp_ns = true;
        }
        if self.restart {
            el = el.attr("xmpp:restart", "true");
            xmpp_ns = true;
        }
        if let Some(hold) = self.hold {
            el = el.attr("hold", hold.to_string());
        }
        if let Some(ack) = self.ack {
            el = el.attr("ack", ack.to_string());
        }
        if let Some(content) = &self.content {
            el = el.attr("content", content);
        }
        if let Some(rid) = self.rid {
            el = el.attr("rid", rid.to_string());
        }
        if let Some(sid) = &self.sid {
            el = el.attr("sid", sid);
        }
        if let Some(requests) = self.requests {
            el = el.attr("requests", requests.to_string());
        }
        if let Some(polling) = self.polling {
            el = el.attr("polling", polling.as_secs().to_string());
        }
        if let Some(inactivity) = self.inactivity {
            el = el.attr("inactivity", inactivity.as_secs().to_string());
        }
        if let Some(accept) = &self.accept {
            el = el.attr("accept", accept);
        }
        if let Some(max_pause) = self.max_pause {
            el = el.attr("maxpause", max_pause.as_secs().to_string());
        }

        for child in &self.children {
            if child.prefix() == Some("stream") {
                stream_ns = true;
            }
            el = el.child(child.clone());
        }

        if xmpp_ns {
            el = el.attr("xmlns:xmpp", NS_XMPP);
        }
        if stream_ns {
            el = el.attr("xmlns:stream", NS_STREAM);
        }
        el
    }
}

fn attr_string(el: &Element, key: &str) -> Option<String> {
    el.attribute(key)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn attr_parse<T: std::str::FromStr>(el: &Element, key: &str) -> Option<T> {
    el.attribute(key).and_then(|v| v.parse().ok())
}

fn attr_seconds(el: &Element, key: &str) -> Option<Duration> {
    attr_parse::<u64>(el, key).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_body() -> Body {
        Body {
            to: Some("foo@bar".into()),
            from: Some("baz@quux".into()),
            lang: Some("en-gb".into()),
            accept: Some("deflate,gzip".into()),
            content: Some("application/xml; charset=utf-8".into()),
            sid: Some("bo12345sh".into()),
            ver: Some(Version::new(1, 4)),
            xmpp_ver: Some(Version::new(2, 0)),
            wait: Some(Duration::from_secs(5)),
            polling: Some(Duration::from_secs(3)),
            inactivity: Some(Duration::from_secs(37)),
            max_pause: Some(Duration::from_secs(93)),
            hold: Some(14),
            ack: Some(1),
            rid: Some(619_727_392_817),
            requests: Some(7),
            restart_logic: true,
            restart: true,
            kind: None,
            condition: None,
            children: vec![Element::new("message")],
        }
    }

    #[test]
    fn renders_present_attributes_in_canonical_order() {
        let want = Element::new("body")
            .attr("xmlns", NS_BOSH)
            .attr("to", "foo@bar")
            .attr("from", "baz@quux")
            .attr("xml:lang", "en-gb")
            .attr("ver", "1.4")
            .attr("wait", "5")
            .attr("xmpp:version", "2.0")
            .attr("xmpp:restartlogic", "true")
            .attr("xmpp:restart", "true")
            .attr("hold", "14")
            .attr("ack", "1")
            .attr("content", "application/xml; charset=utf-8")
            .attr("rid", "619727392817")
            .attr("sid", "bo12345sh")
            .attr("requests", "7")
            .attr("polling", "3")
            .attr("inactivity", "37")
            .attr("accept", "deflate,gzip")
            .attr("maxpause", "93")
            .attr("xmlns:xmpp", NS_XMPP)
            .child(Element::new("message"));
        assert_eq!(full_body().to_element(), want);
    }

    #[test]
    fn declares_stream_namespace_for_stream_children() {
        let mut body = full_body();
        body.children.push(Element::new("stream:error"));
        let el = body.to_element();
        assert_eq!(el.attribute("xmlns:stream"), Some(NS_STREAM));
    }

    #[test]
    fn omits_namespace_declarations_without_uses() {
        let el = Body::default().to_element();
        assert_eq!(el.attribute("xmlns"), Some(NS_BOSH));
        assert_eq!(el.attribute("xmlns:xmpp"), None);
        assert_eq!(el.attribute("xmlns:stream"), None);
    }

    #[test]
    fn parses_attributes_over_defaults() {
        let el = full_body().to_element();
        let parsed = Body::parse(&el, &Body::server_defaults());
        assert_eq!(parsed, full_body());
    }

    #[test]
    fn parses_empty_body_to_defaults() {
        let defaults = Body::server_defaults();
        let parsed = Body::parse(&Element::new("body"), &defaults);

        let want = Body {
            hold: None,
            ack: None,
            rid: None,
            restart_logic: false,
            ..defaults
        };
        assert_eq!(parsed, want);
    }

    #[test]
    fn absent_hold_stays_distinct_from_zero() {
        let defaults = Body::server_defaults();
        let absent = Body::parse(&Element::new("body"), &defaults);
        assert_eq!(absent.hold, None);

        let zero = Body::parse(&Element::new("body").attr("hold", "0"), &defaults);
        assert_eq!(zero.hold, Some(0));

        let malformed = Body::parse(&Element::new("body").attr("hold", "lots"), &defaults);
        assert_eq!(malformed.hold, defaults.hold);
    }

    #[test]
    fn restart_requires_the_literal_true() {
        let defaults = Body::default();
        let el = Element::new("body").attr("xmpp:restart", "1");
        assert!(!Body::parse(&el, &defaults).restart);

        let el = Element::new("body").attr("xmpp:restart", "true");
        assert!(Body::parse(&el, &defaults).restart);
    }

    #[test]
    fn terminate_bodies_render_type_and_condition() {
        let el = Body::terminate(Condition::BadRequest).to_element();
        let want = Element::new("body")
            .attr("xmlns", NS_BOSH)
            .attr("type", "terminate")
            .attr("condition", "bad-request");
        assert_eq!(el, want);
    }

    #[test]
    fn wire_round_trip_preserves_known_attributes() {
        let el = Element::new("body")
            .attr("xmlns", NS_BOSH)
            .attr("to", "example.net")
            .attr("ver", "1.6")
            .attr("wait", "60")
            .attr("hold", "1")
            .attr("ack", "7")
            .attr("rid", "1573741820")
            .attr("requests", "2")
            .attr("polling", "5")
            .attr("inactivity", "75")
            .attr("maxpause", "120")
            .child(Element::new("message").text("ping"));
        let parsed = Body::parse(&el, &Body::default());
        assert_eq!(parsed.to_element(), el);
    }

    #[test]
    fn parses_terminate_vocabulary() {
        let el = Element::new("body")
            .attr("type", "terminate")
            .attr("condition", "item-not-found");
        let parsed = Body::parse(&el, &Body::default());
        assert_eq!(parsed.kind, Some(BodyKind::Terminate));
        assert_eq!(parsed.condition, Some(Condition::ItemNotFound));
    }
}

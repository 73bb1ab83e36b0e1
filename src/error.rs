//! Error types for the BOSH transport.

use thiserror::Error;

/// Problem while reading from or writing to a session's stream surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The session has exited; no further elements will flow.
    #[error("stream closed")]
    Closed,

    /// The client asked for a stream restart; the consumer must run its
    /// start sequence again before reading further elements.
    #[error("stream restart required")]
    RequireRestart,
}

/// A request that has already been responded to was written to again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request has already been responded to")]
pub struct RequestClosed;

/// No live session is registered under the requested session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session not found")]
pub struct SessionNotFound;

/// A version attribute that is not of the `major.minor` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid version")]
pub struct InvalidVersion;

/// Problem while parsing an XML document into an element tree.
#[derive(Debug, Error)]
pub enum XmlError {
    /// The tokenizer rejected the input.
    #[error("malformed xml: {0}")]
    Malformed(#[from] quick_xml::Error),

    /// An attribute could not be decoded.
    #[error("malformed xml attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    /// The document contained no root element.
    #[error("no root element")]
    NoRoot,

    /// The document ended inside an open element.
    #[error("unexpected end of document")]
    UnexpectedEof,
}

//! Protocol Error Types
//!
//! Error types for the XML parser, the framing codec and the DI drivers.

use thiserror::Error;

/// XML parse failures. Any of these drops the whole message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XmlError {
    /// Input ended before the document was complete
    #[error("XML truncated at byte {offset}")]
    Truncated { offset: usize },

    /// `<!--` without a matching `-->`
    #[error("Unterminated XML comment starting at byte {offset}")]
    UnterminatedComment { offset: usize },

    /// `<?` without a matching `?>`
    #[error("Unterminated XML declaration starting at byte {offset}")]
    UnterminatedDeclaration { offset: usize },

    /// `<tag` without a closing `>`
    #[error("Unterminated XML tag starting at byte {offset}")]
    UnterminatedTag { offset: usize },

    /// `<` followed by a character that cannot start a tag name
    #[error("Empty XML tag name at byte {offset}")]
    EmptyTagName { offset: usize },

    /// Character data where an element was required
    #[error("Unexpected text at byte {offset}")]
    UnexpectedText { offset: usize },

    /// Text followed by child elements inside the same element
    #[error("Mixed content in <{tag}> at byte {offset}")]
    MixedContent { tag: String, offset: usize },

    /// Nesting exceeds the parser depth limit
    #[error("XML nesting deeper than {limit} levels")]
    TooDeep { limit: usize },
}

/// Framing failures. Any of these is fatal for the current session.
#[derive(Debug, Error)]
pub enum FramingError {
    /// Peer closed or a field was cut short
    #[error("Frame truncated while reading {field}: {source}")]
    Truncated {
        field: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Declared length exceeds the receive ceiling
    #[error("Frame length {length} exceeds maximum {max}")]
    Oversized { length: usize, max: usize },

    /// Outgoing payload does not fit the 32-bit length field
    #[error("Payload of {0} bytes cannot be framed")]
    PayloadTooLarge(usize),

    /// Socket write failure
    #[error("Frame send failed: {0}")]
    Send(#[source] std::io::Error),

    /// Read or write did not complete in time
    #[error("Frame {0} timed out")]
    Timeout(&'static str),
}

/// Digital-input driver failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DioError {
    /// Setting channel modes failed
    #[error("DI mode set failed on slot {slot}: code {code}")]
    ModeSet { slot: u8, code: i32 },

    /// Reading the input word failed
    #[error("DI read failed on slot {slot}: code {code}")]
    Read { slot: u8, code: i32 },
}

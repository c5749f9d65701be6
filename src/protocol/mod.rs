//! Message model and the binary codec.
//!
//! A frame is a three byte direction tag, a little endian `header_length`, a
//! `name=value:` header section and a body whose size is announced by the
//! `Content-Length` header.

pub use codec::{content_length_from_section, parse_header_section, preview, PREAMBLE_SIZE};
pub use message::{
    Direction, Message, CONTENT_LENGTH, CONTENT_TYPE, ERROR_CONTENT_TYPE, METHOD, SESSION,
};

mod codec;
mod message;

//! # courier-protocol
//!
//! Wire protocol shared by the hub and its clients.
//!
//! - [`Frame`]: one command + headers + body unit
//! - [`decode`] / [`encode`]: stateless text codec (NUL-terminated frames)
//! - [`FrameBuffer`]: reassembles frames split across socket deliveries
//! - [`DestinationKey`]: canonical, identity-scoped destination used for routing
//!
//! Header values are not escaped. Builders replace CR/LF (and `:` in keys)
//! with spaces so an encoded frame always decodes to the same headers.

#![deny(unsafe_code)]

pub mod buffer;
pub mod codec;
pub mod destination;
pub mod errors;
pub mod frame;

pub use buffer::FrameBuffer;
pub use codec::{FRAME_TERMINATOR, decode, encode};
pub use destination::{DestinationKey, USER_DESTINATION_PREFIX};
pub use errors::{ProtocolError, Result};
pub use frame::{Command, Frame, close_codes, headers};

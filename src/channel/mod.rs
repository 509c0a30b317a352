//! Secure control channel between the daemon and its privileged peer
//!
//! Untrusted bytes enter here. The codec parses and authenticates framed
//! messages; the channel layers session state, replay defense and timeouts
//! on top. Nothing downstream ever sees a message that failed
//! authentication.

pub mod codec;
pub mod session;

pub use codec::{decode, encode, CodecError, Message, SessionKey, MAX_PAYLOAD_LEN};
pub use session::{ChannelConfig, ChannelError, FrameTransport, SecureChannel, SecureSession};

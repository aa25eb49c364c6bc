//! liveproto - OSC transport and correlation for livebridge
//!
//! The control surface (AbletonOSC) speaks OSC over UDP: every message is an
//! address plus typed arguments, and nothing on the wire ties a reply to
//! the request that caused it. This crate rebuilds request/response on top.
//!
//! ## Layers
//!
//! - `codec` - `Message`/`Arg` and OSC encode/decode via `rosc`
//! - `channel` - the UDP socket pair and the receive task (`Transport` impl)
//! - `correlator` - the reactor that matches replies to waiters by address,
//!   echoed-argument token and issue order, plus subscriptions
//! - `retry` - Lazy Pirate retry policy for idempotent reads
//!
//! ## Correlation Rules
//!
//! - A waiter is registered before its request is sent
//! - Replies match on exact address, then on leading arguments (the token)
//! - Waiters on one address are served oldest first
//! - Subscriptions see every message on their address and never consume
//!   replies
//! - Peer errors go to the oldest armed waiter or command slot

pub mod channel;
pub mod codec;
pub mod correlator;
pub mod error;
pub mod retry;

pub use channel::{Channel, ChannelConfig, Transport};
pub use codec::{decode, decode_datagram, encode, Arg, Message};
pub use correlator::{
    CommandOutcome, ConnectionState, Correlator, CorrelatorOptions, ResponseKey, Subscription, ERROR_ADDRESS,
};
pub use error::{ChannelError, CodecError, CorrelationError};
pub use retry::RetryPolicy;

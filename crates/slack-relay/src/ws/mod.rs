//! WebSocket relay.
//!
//! Clients connect at `/stream`, receive a welcome frame, and from then on
//! get every relayable Slack message. They may authenticate to obtain an
//! anonymous identity, post messages under it, and request history.

pub mod codec;
mod handler;
pub mod hub;
mod platform;
pub mod registry;
pub mod types;

pub use handler::{MAX_INBOUND_FRAME_BYTES, stream_handler};
pub use hub::{
    ClientConnection, HubClosed, HubConfig, HubError, HubHandle, INVALID_IDENTITY_WARNING,
    RelayHub, ResolutionError,
};
pub use platform::relay_platform_events;
pub use registry::{ClientId, DeliveryFailure, ReplayTarget};
pub use types::{DecodeError, Frame, InboundRequest, ServerFrame, decode_inbound};

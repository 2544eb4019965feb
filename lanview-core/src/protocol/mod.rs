//! Wire formats: the WebSocket control protocol and the UDP discovery
//! datagrams. Both are JSON.

pub mod control;
pub mod discovery;

pub use control::{
    ClientMessage, Codec, FrameMeta, Heartbeat, KeyboardIntent, MonitorInfo, MouseButton,
    MouseIntent, PointerMove, ScreenInfo, ServerDescriptor, ServerMessage, StreamRequest, Welcome,
};
pub use discovery::{SERVICE_NAME, ServerInfo, is_discover_request};

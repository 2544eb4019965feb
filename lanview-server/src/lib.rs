//! # lanview-server: LAN screen streaming host
//!
//! Captures the local desktop, encodes frames as JPEG and streams them
//! to controllers over WebSocket. Controllers find the host with a UDP
//! broadcast and can drive its mouse and keyboard.
//!
//! The session control plane lives in `lanview-core`; this crate
//! supplies the platform collaborators and the process around them:
//!
//! - [`capture`]: DXGI Desktop Duplication, or a synthetic test pattern
//! - [`encoder`]: JPEG encoding with optional downscale
//! - [`pipeline`]: capture thread + encoder behind `FrameSource`
//! - [`input`]: Win32 `SendInput` behind `InputActuator`
//! - [`host`]: advertised address and host name
//! - [`service`]: binds and runs the stream server and discovery

pub mod capture;
pub mod config;
pub mod encoder;
pub mod host;
pub mod input;
pub mod pipeline;
pub mod service;

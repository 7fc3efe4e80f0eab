//! `reliable-udp`: a reliable, in-order, message-oriented transport over a
//! lossy datagram channel.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  send(data) / receive() / close()
//!  ┌───▼───────────────────────────────┐
//!  │             Session               │
//!  │  Sender (stop-and-wait, seq nums) │◀── "ack for seq N" ──┐
//!  └───┬───────────────────────────────┘                      │
//!      │ DATA / FIN              in-order payloads ◀──┐       │
//!      │                                        ┌─────┴───────┴─────┐
//!      │                                        │    event_loop     │
//!      │                                        │ Receiver (reorder)│
//!      │                                        └─────────▲─────────┘
//!  ┌───▼────────────────────────────────────────────────────┴──┐
//!  │            Channel (UdpChannel / LossyChannel)            │
//!  └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      — wire format (serialise / deserialise)
//! - [`session`]     — public API, fragmentation, close handshake
//! - [`sender`]      — stop-and-wait retransmission controller
//! - [`receiver`]    — out-of-order buffering and in-order release
//! - [`event_loop`]  — background task draining the channel
//! - [`state`]       — session state-machine types
//! - [`timer`]       — retransmit and teardown timing
//! - [`simulator`]   — optional lossy/reorder channel for testing
//! - [`socket`]      — datagram channel abstraction and UDP implementation

pub mod event_loop;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use packet::{FrameType, Packet, PacketError, HEADER_LEN, MAX_PAYLOAD_SIZE};
pub use session::{Session, SessionConfig, SessionError};
pub use simulator::{LossyChannel, SimulatorConfig, SimulatorStats};
pub use socket::{Channel, ChannelError, UdpChannel};
pub use state::SessionState;
pub use timer::TimerConfig;

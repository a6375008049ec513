//! Control channel: datagram format, listener and sender

pub mod listener;
pub mod message;
pub mod sender;

pub use listener::{ControlHandler, ControlListener, ListenerSettings};
pub use message::ControlMessage;
pub use sender::send_control;

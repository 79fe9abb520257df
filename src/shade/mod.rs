//! Shade command service: command encoding, the outbound FIFO discipline,
//! inbound indication parsing, discovery, and the weekly battery sweep
//! (design §4.3).

pub mod battery;
pub mod command;
pub mod discovery;
pub mod indication;
pub mod service;

pub use command::{ControllerButton, PositionSetting, RailKind, ResetMask, ShadeCommand};
pub use discovery::{DiscoveredDevice, DiscoveryMode};
pub use indication::{IndicationEvent, ShadeEvent};
pub use service::{IndicationSender, IndicationSink, ShadeService, ShadeServiceHandle};

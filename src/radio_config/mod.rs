//! Radio co-processor startup and parameter-programming sequence.

pub mod machine;
pub mod nvconfig;

pub use machine::{RadioConfigInbound, RadioConfigMachine, RadioReadySignal};
pub use nvconfig::{CsmaBackoff, NonVolatileRadioConfig};

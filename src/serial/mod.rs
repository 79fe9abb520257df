//! Serial link: OS-thread byte I/O plus the async inbound framer.

pub mod framer;
pub mod port;

pub use framer::{run as run_framer, RoutedFrame, RoutedFrameChannel, RoutedFrameSender};
pub use port::{open, PortWriter};

//! Serial wire protocol: transport framing, record-type table, and the
//! project's base64 dialect used for cloud Basic-Auth credentials.

pub mod base64_variant;
pub mod frame;
pub mod record_types;

pub use frame::{Decoder, DecodedFrame, ESC, SOH};
pub use record_types::{validate, RecordType};

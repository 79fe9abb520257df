//! Outbound message pacing: the generational request arena and the
//! single-active-delivery manager state machine (design §4.2, §3).

pub mod manager;
pub mod queue;

pub use manager::{
    DeliveryId, DeliveryOutcome, DeliveryRequest, DeliveryResult, OutboundHandle, OutboundManager,
    RetryPolicy, SerialAck, SerialWriter,
};
pub use queue::{DestinationKind, RecordState, RequestQueue, RequestRecord, RequestToken};

//! Cloud-facing subsystem: REST transport, the remote-action/time/firmware
//! exchanges, and the coordinator that serializes them (design §4.5).

pub mod action_server;
pub mod coordinator;
pub mod firmware;
pub mod rest;
pub mod time_server;

pub use coordinator::{RemoteCoordinator, RemoteEvent, RemoteEventChannel, RemoteEventReceiver, RemoteEventSender};
pub use rest::RestClient;

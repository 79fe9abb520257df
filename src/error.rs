//! Crate-wide error vocabulary.
//!
//! Two enums cover the two error surfaces named in the design: [`GatewayError`]
//! for failures internal to this process (serial setup, persistence,
//! protocol decoding) and [`RemoteServerStatus`] for the cloud-facing status
//! reported by the remote-server coordinator. A `GatewayError` that occurs
//! while servicing a cloud exchange is folded into a `RemoteServerStatus`
//! at the coordinator boundary (see `remote::rest`).

use std::path::PathBuf;

/// The stage of a cloud response pipeline at which a receive failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStage {
    Headers,
    Body,
    Trailer,
}

impl std::fmt::Display for ReceiveStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiveStage::Headers => write!(f, "headers"),
            ReceiveStage::Body => write!(f, "body"),
            ReceiveStage::Trailer => write!(f, "trailer"),
        }
    }
}

/// Status reported by the remote-server coordinator for a single cloud
/// exchange. Mirrors the enumeration in the design's error-handling section.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteServerStatus {
    #[error("exchange completed successfully")]
    Ok,
    #[error("cannot connect to host")]
    CannotConnect,
    #[error("cannot establish TLS session")]
    CannotConnectTls,
    #[error("local resource unavailable")]
    LocalResource,
    #[error("cannot send request")]
    CannotSend,
    #[error("cannot receive response ({0})")]
    CannotReceive(ReceiveStage),
    #[error("no response within timeout")]
    NoResponse,
    #[error("cannot parse response body")]
    CannotParseResponse,
    #[error("cannot parse firmware update url")]
    CannotParseUpdateUrl,
    #[error("cannot parse file url")]
    CannotParseFileUrl,
    #[error("cannot write version file")]
    CannotWriteVersionFile,
    #[error("cannot retrieve file")]
    CannotRetrieveFile,
    #[error("cannot create local file")]
    CannotCreateLocalFile,
    #[error("cannot write local file")]
    CannotWriteLocalFile,
    #[error("cannot compute md5 digest")]
    CannotComputeMd5,
    #[error("download incomplete")]
    DownloadIncomplete,
    #[error("md5 verification failed")]
    Md5CheckError,
}

impl RemoteServerStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, RemoteServerStatus::Ok)
    }
}

/// Internal failure vocabulary: serial setup, persistence, protocol decode.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("serial port {path} unavailable: {source}")]
    SerialPort {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("radio co-processor did not become ready after {attempts} reset attempts")]
    RadioUnresponsive { attempts: u32 },

    #[error("persisted file {path:?} could not be read: {source}")]
    PersistRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("persisted file {path:?} could not be written: {source}")]
    PersistWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path:?} is not valid TOML: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("reset command encodes a reserved mask bit: {mask:#04x}")]
    ReservedResetBit { mask: u8 },

    #[error("outbound manager rejected request: one already in flight")]
    OutboundBusy,

    #[error("discovery filter rejected device type {device_type:#04x}")]
    DiscoveryTypeMismatch { device_type: u8 },
}

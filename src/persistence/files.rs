//! Stable persisted file names (design §6), rooted under
//! [`crate::config::GatewayConfig::state_dir`].

pub const RF_CONFIG: &str = "rf_config";

pub const HOST_FIRMWARE_IMAGE: &str = "app.hex";
pub const HOST_FIRMWARE_MD5: &str = "app.md5";
pub const RADIO_FIRMWARE_IMAGE: &str = "rf.bin";
pub const RADIO_FIRMWARE_MD5: &str = "rf.md5";
pub const RADIO_FIRMWARE_VERSION: &str = "rf.ver";

pub const LOG_ACTIVE: &str = "log.txt";
pub const LOG_BACKUP: &str = "log.bak";

pub const DATA_SYNC_STAGING: &str = "hub_syn.jso";
pub const REGISTRATION: &str = "reg.dat";

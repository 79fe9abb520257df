//! Serial record type table.
//!
//! Request and indication type codes are disjoint (design §6). Before a
//! decoded frame is handed to a dispatch function, the inbound framer looks
//! its type code up here and checks the payload length falls within the
//! declared bounds; unknown or length-invalid records are dropped.

/// One row of the `(type, min_len, max_len)` validation table. The dispatch
/// function itself lives with its owning subsystem (outbound manager, shade
/// service, radio-config machine) — this table only answers "is this frame
/// worth handing onward".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTypeInfo {
    pub code: u8,
    pub name: &'static str,
    pub min_len: u8,
    pub max_len: u8,
}

macro_rules! record_types {
    ($($name:ident = $code:expr, $min:expr, $max:expr;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum RecordType {
            $($name = $code,)*
        }

        pub const RECORD_TABLE: &[RecordTypeInfo] = &[
            $(RecordTypeInfo { code: $code, name: stringify!($name), min_len: $min, max_len: $max },)*
        ];

        impl RecordType {
            pub fn from_code(code: u8) -> Option<RecordType> {
                match code {
                    $($code => Some(RecordType::$name),)*
                    _ => None,
                }
            }
        }
    };
}

record_types! {
    ConfigGetReq  = 0x04, 0, 0;
    ConfigGetConf = 0x05, 8, 8;
    ConfigSetReq  = 0x06, 8, 8;
    ConfigSetConf = 0x07, 1, 1;
    ShadeDataReq  = 0x0C, 2, 74;
    ShadeDataConf = 0x0D, 1, 1;
    ShadeDataInd  = 0x0E, 3, 48;
    BeaconReq     = 0x0F, 0, 1;
    BeaconConf    = 0x10, 1, 1;
    BeaconInd     = 0x11, 13, 13;
    GroupSetReq   = 0x12, 33, 41;
    GroupSetConf  = 0x14, 1, 1;
    GroupSetInd   = 0x15, 34, 34;
    ResetReq      = 0x1D, 1, 1;
    ResetConf     = 0x1E, 1, 1;
    StartReq      = 0x1F, 0, 0;
    StartConf     = 0x20, 1, 1;
    SystemInd     = 0xFF, 1, 16;
}

/// Validate `(code, len)` against the table. Returns the matching record
/// type only if the length falls within its declared bounds.
pub fn validate(code: u8, len: usize) -> Option<RecordType> {
    let info = RECORD_TABLE.iter().find(|info| info.code == code)?;
    if len < info.min_len as usize || len > info.max_len as usize {
        return None;
    }
    RecordType::from_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_code_is_rejected() {
        assert!(validate(0xAB, 1).is_none());
    }

    #[test]
    fn length_outside_bounds_is_rejected() {
        assert!(validate(0x1F, 1).is_none()); // StartReq wants len 0
        assert!(validate(0x1F, 0).is_some());
    }

    #[test]
    fn request_and_indication_codes_are_disjoint() {
        use std::collections::HashSet;
        let codes: Vec<u8> = RECORD_TABLE.iter().map(|i| i.code).collect();
        let unique: HashSet<u8> = codes.iter().copied().collect();
        assert_eq!(codes.len(), unique.len());
    }
}

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Classified LA66 response line.
///
/// Response matching is done once at the transport boundary so the protocol
/// state machines switch on variants instead of string literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtToken {
    /// `OK` sentinel terminating a command
    Ok,
    /// `AT_ERROR`
    Error,
    /// `AT_PARAM_ERROR`
    ParamError,
    /// `AT_BUSY_ERROR`
    BusyError,
    /// `AT_NO_NET_JOINED`
    NoNetJoined,
    /// `JOINED` network notification
    Joined,
    /// `txDone` radio notification
    TxDone,
    /// `rxDone` radio notification
    RxDone,
    /// `rxTimeout` radio notification
    RxTimeout,
    /// `Sync time ok` notification
    SyncTimeOk,
    /// Anything else, e.g. a query response payload
    Other,
}

impl AtToken {
    /// Classify a response line against the known token set.
    pub fn classify(line: &str) -> AtToken {
        match line {
            AT_OK => AtToken::Ok,
            AT_ERROR => AtToken::Error,
            AT_PARAM_ERROR => AtToken::ParamError,
            AT_BUSY_ERROR => AtToken::BusyError,
            AT_NO_NET_JOINED => AtToken::NoNetJoined,
            AT_JOINED => AtToken::Joined,
            AT_TX_DONE => AtToken::TxDone,
            AT_RX_DONE => AtToken::RxDone,
            AT_RX_TIMEOUT => AtToken::RxTimeout,
            AT_SYNC_TIME_OK => AtToken::SyncTimeOk,
            _ => AtToken::Other,
        }
    }
}

/// A downlink payload retrieved after a successful transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downlink {
    /// Application port the downlink was addressed to
    pub port: u8,
    /// Decoded payload bytes
    pub data: Vec<u8>,
}

/// One round of fence and battery measurements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    /// Battery voltage in mV
    pub battery_mv: u16,
    /// Fence voltage, positive polarity, in V
    pub fence_plus: u16,
    /// Fence voltage, negative polarity, in V
    pub fence_minus: u16,
}

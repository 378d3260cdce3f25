//! Query kinds serviced by the poll scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One kind of device read.
///
/// Declaration order is service priority: when several kinds are due in
/// the same tick, the earliest one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryKind {
    /// Lock or opener status.
    Status,
    /// Battery report.
    Battery,
    /// Basic configuration block.
    Config,
    /// Advanced configuration block.
    AdvancedConfig,
    /// Security PIN verification.
    PinCheck,
    /// Keypad code list.
    Keypad,
    /// Time-control rule list.
    TimeControl,
    /// Authorization list.
    Authorization,
    /// Authorization log.
    AuthLog,
    /// Signal strength, read locally.
    Rssi,
}

impl QueryKind {
    /// Number of query kinds.
    pub const COUNT: usize = 10;

    /// All kinds in priority order.
    pub const ALL: [QueryKind; QueryKind::COUNT] = [
        QueryKind::Status,
        QueryKind::Battery,
        QueryKind::Config,
        QueryKind::AdvancedConfig,
        QueryKind::PinCheck,
        QueryKind::Keypad,
        QueryKind::TimeControl,
        QueryKind::Authorization,
        QueryKind::AuthLog,
        QueryKind::Rssi,
    ];

    /// Position in [`QueryKind::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Bit in the immediate-request mask.
    pub fn bit(&self) -> u16 {
        1 << self.index()
    }

    /// Whether this kind runs on an interval, as opposed to only on request.
    pub fn is_periodic(&self) -> bool {
        !matches!(
            self,
            QueryKind::AdvancedConfig | QueryKind::PinCheck | QueryKind::AuthLog
        )
    }

    /// Whether servicing this kind costs a radio exchange.
    pub fn uses_radio(&self) -> bool {
        !matches!(self, QueryKind::Rssi)
    }

    /// Returns the camelCase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Status => "status",
            QueryKind::Battery => "battery",
            QueryKind::Config => "config",
            QueryKind::AdvancedConfig => "advancedConfig",
            QueryKind::PinCheck => "pinCheck",
            QueryKind::Keypad => "keypad",
            QueryKind::TimeControl => "timeControl",
            QueryKind::Authorization => "authorization",
            QueryKind::AuthLog => "authLog",
            QueryKind::Rssi => "rssi",
        }
    }

    /// Parses a camelCase name.
    pub fn parse(input: &str) -> Option<Self> {
        QueryKind::ALL.into_iter().find(|k| k.as_str() == input)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Entry lists held on the device.

use chrono::{Datelike, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inbound and published format for calendar dates.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Inbound and published format for times of day.
pub const TIME_FORMAT: &str = "%H:%M";

/// One class of device-held list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListKind {
    /// Keypad codes.
    Keypad,
    /// Time-control rules.
    TimeControl,
    /// Authorizations (apps, fobs, bridges).
    Authorization,
    /// Authorization log, read-only.
    AuthLog,
}

impl ListKind {
    /// All list kinds.
    pub const ALL: [ListKind; 4] = [
        ListKind::Keypad,
        ListKind::TimeControl,
        ListKind::Authorization,
        ListKind::AuthLog,
    ];

    /// Position in [`ListKind::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Whether remote add/update/delete commands exist for this list.
    pub fn accepts_commands(&self) -> bool {
        !matches!(self, ListKind::AuthLog)
    }

    /// Whether per-slot detail is published for this list.
    pub fn has_slots(&self) -> bool {
        !matches!(self, ListKind::AuthLog)
    }

    /// Returns the camelCase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Keypad => "keypad",
            ListKind::TimeControl => "timeControl",
            ListKind::Authorization => "authorization",
            ListKind::AuthLog => "authLog",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weekday bitmask, Monday in bit 6 down to Sunday in bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Weekdays(pub u8);

impl Weekdays {
    const NAMES: [(&'static str, u8); 7] = [
        ("mon", 64),
        ("tue", 32),
        ("wed", 16),
        ("thu", 8),
        ("fri", 4),
        ("sat", 2),
        ("sun", 1),
    ];

    /// Every day of the week.
    pub const ALL: Weekdays = Weekdays(127);

    /// Builds a mask from short day names. Unknown names are skipped.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut bits = 0;
        for name in names {
            if let Some((_, bit)) = Self::NAMES.iter().find(|(n, _)| *n == name.as_ref()) {
                bits |= bit;
            }
        }
        Weekdays(bits)
    }

    /// Short day names contained in the mask, Monday first.
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, bit)| self.0 & bit != 0)
            .map(|(n, _)| *n)
            .collect()
    }
}

/// Parses `YYYY-MM-DD HH:MM:SS`, requiring a year in 2000..=3000.
pub fn parse_date_time(input: &str) -> Option<NaiveDateTime> {
    let value = NaiveDateTime::parse_from_str(input, DATE_TIME_FORMAT).ok()?;
    (2000..=3000).contains(&value.year()).then_some(value)
}

/// Parses `HH:MM`.
pub fn parse_time(input: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(input, TIME_FORMAT).ok()
}

/// A keypad code is six digits, none of them zero.
pub fn is_valid_keypad_code(code: u32) -> bool {
    code > 100_000 && code < 1_000_000 && !code.to_string().contains('0')
}

/// Validity window shared by keypad codes and authorizations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccessWindow {
    /// Whether the window is enforced.
    pub time_limited: bool,
    /// Valid from.
    pub allowed_from: Option<NaiveDateTime>,
    /// Valid until.
    pub allowed_until: Option<NaiveDateTime>,
    /// Allowed weekdays.
    pub allowed_weekdays: Weekdays,
    /// Daily start time.
    pub allowed_from_time: Option<NaiveTime>,
    /// Daily end time.
    pub allowed_until_time: Option<NaiveTime>,
}

/// A keypad code slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeypadEntry {
    /// Device-assigned id.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Six-digit code.
    pub code: u32,
    /// Whether the code is active.
    pub enabled: bool,
    /// Validity window.
    #[serde(flatten)]
    pub window: AccessWindow,
}

/// A time-control rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeControlEntry {
    /// Device-assigned id.
    pub id: u32,
    /// Whether the rule is active.
    pub enabled: bool,
    /// Days the rule fires on.
    pub weekdays: Weekdays,
    /// Time of day the rule fires at.
    pub time: NaiveTime,
    /// Name of the action to perform, in the device's vocabulary.
    pub lock_action: String,
}

/// An authorization record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationEntry {
    /// Device-assigned id.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Whether the authorization is active.
    pub enabled: bool,
    /// Whether remote (internet) access is permitted.
    pub remote_allowed: bool,
    /// Validity window.
    #[serde(flatten)]
    pub window: AccessWindow,
}

/// An authorization log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Monotonic log index.
    pub index: u32,
    /// Device time of the event.
    pub timestamp: Option<NaiveDateTime>,
    /// Authorization that caused the event.
    pub auth_id: u32,
    /// Name of that authorization.
    pub name: String,
    /// Event type code.
    pub logging_type: u8,
}

/// An entry of any list kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entry {
    /// Keypad code.
    Keypad(KeypadEntry),
    /// Time-control rule.
    TimeControl(TimeControlEntry),
    /// Authorization.
    Authorization(AuthorizationEntry),
    /// Log record.
    Log(LogEntry),
}

impl Entry {
    /// The list this entry belongs to.
    pub fn kind(&self) -> ListKind {
        match self {
            Entry::Keypad(_) => ListKind::Keypad,
            Entry::TimeControl(_) => ListKind::TimeControl,
            Entry::Authorization(_) => ListKind::Authorization,
            Entry::Log(_) => ListKind::AuthLog,
        }
    }

    /// The entry's identifier within its list.
    pub fn id(&self) -> u32 {
        match self {
            Entry::Keypad(e) => e.id,
            Entry::TimeControl(e) => e.id,
            Entry::Authorization(e) => e.id,
            Entry::Log(e) => e.index,
        }
    }

    /// Replaces the identifier.
    pub fn set_id(&mut self, id: u32) {
        match self {
            Entry::Keypad(e) => e.id = id,
            Entry::TimeControl(e) => e.id = id,
            Entry::Authorization(e) => e.id = id,
            Entry::Log(e) => e.index = id,
        }
    }
}

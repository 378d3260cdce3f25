//! Inbound entry commands and their validation.
//!
//! An [`EntryCommand`] is the JSON object a remote client sends to add,
//! update, delete or check an entry. Field validation happens here;
//! whether the command may run at all (PIN, configuration, feature
//! switches) is decided by the engine.
//!
//! Updates merge: every field the caller omits is taken from the entry
//! as last fetched from the device.

use crate::action::ActionKind;
use crate::entry::{
    is_valid_keypad_code, parse_date_time, parse_time, AccessWindow, AuthorizationEntry,
    KeypadEntry, TimeControlEntry, Weekdays,
};
use crate::error::{ProtocolError, ProtocolResult};
use crate::result::Reason;
use chrono::{NaiveDateTime, NaiveTime};
use serde::Deserialize;

/// What an entry command asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    /// Create a new entry.
    Add,
    /// Change an existing entry.
    Update,
    /// Remove an existing entry.
    Delete,
    /// Compare a keypad code against the stored one.
    Check,
}

impl EntryAction {
    fn parse(input: &str) -> Option<Self> {
        match input.to_ascii_lowercase().as_str() {
            "add" => Some(EntryAction::Add),
            "update" => Some(EntryAction::Update),
            "delete" => Some(EntryAction::Delete),
            "check" => Some(EntryAction::Check),
            _ => None,
        }
    }
}

/// A JSON scalar that may arrive as a number, a string or a boolean.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// JSON boolean.
    Bool(bool),
    /// JSON integer.
    Int(i64),
    /// JSON string.
    Text(String),
}

impl Scalar {
    /// Interprets the value as an unsigned integer.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Scalar::Int(n) => u32::try_from(*n).ok(),
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Bool(_) => None,
        }
    }

    /// Interprets the value as a flag.
    pub fn as_bool(&self) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Int(n) => *n != 0,
            Scalar::Text(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        }
    }
}

/// A decoded entry command.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryCommand {
    /// `add`, `update`, `delete` or `check`.
    pub action: Option<String>,
    /// Entry id.
    #[serde(alias = "codeId", alias = "entryId", alias = "authId")]
    pub id: Option<Scalar>,
    /// Display name.
    pub name: Option<String>,
    /// Keypad code.
    pub code: Option<Scalar>,
    /// Active flag.
    pub enabled: Option<Scalar>,
    /// Whether the validity window applies.
    pub time_limited: Option<Scalar>,
    /// Window start date.
    pub allowed_from: Option<String>,
    /// Window end date.
    pub allowed_until: Option<String>,
    /// Window weekdays.
    pub allowed_weekdays: Option<Vec<String>>,
    /// Daily window start.
    pub allowed_from_time: Option<String>,
    /// Daily window end.
    pub allowed_until_time: Option<String>,
    /// Time-control weekdays.
    pub weekdays: Option<Vec<String>>,
    /// Time-control time of day.
    pub time: Option<String>,
    /// Time-control action.
    pub lock_action: Option<String>,
    /// Authorization remote access flag.
    pub remote_allowed: Option<Scalar>,
}

impl EntryCommand {
    /// Decodes a command payload.
    pub fn from_json(payload: &str) -> ProtocolResult<Self> {
        let value: serde_json::Value = serde_json::from_str(payload)?;
        if !value.is_object() {
            return Err(ProtocolError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The requested action.
    pub fn entry_action(&self) -> Result<EntryAction, Reason> {
        match self.action.as_deref().map(str::trim) {
            None | Some("") => Err(Reason::NoActionSet),
            Some(a) => EntryAction::parse(a).ok_or(Reason::InvalidAction),
        }
    }

    /// The entry id, when one was supplied.
    pub fn entry_id(&self) -> Option<u32> {
        self.id.as_ref().and_then(Scalar::as_u32)
    }

    /// The supplied code, if it parses as a number.
    pub fn code_value(&self) -> Option<u32> {
        self.code.as_ref().and_then(Scalar::as_u32)
    }

    /// Checks the format of every field that was supplied.
    ///
    /// Runs before any device contact, so an update with a malformed field
    /// is rejected without fetching the existing entry first.
    pub fn validate_supplied<A: ActionKind>(&self) -> Result<(), Reason> {
        if let Some(code) = &self.code {
            match code.as_u32() {
                Some(c) if is_valid_keypad_code(c) => {}
                _ => return Err(Reason::CodeInvalid),
            }
        }
        optional_date(&self.allowed_from, Reason::InvalidAllowedFrom)?;
        optional_date(&self.allowed_until, Reason::InvalidAllowedUntil)?;
        optional_time(&self.allowed_from_time, Reason::InvalidAllowedFromTime)?;
        optional_time(&self.allowed_until_time, Reason::InvalidAllowedUntilTime)?;
        optional_time(&self.time, Reason::InvalidTime)?;
        if let Some(action) = non_empty(&self.lock_action) {
            if A::parse(action).is_none() {
                return Err(Reason::InvalidLockAction);
            }
        }
        Ok(())
    }

    /// Builds the keypad entry to write, on top of `base` for updates.
    pub fn keypad_entry(&self, base: Option<&KeypadEntry>) -> Result<KeypadEntry, Reason> {
        let name = non_empty(&self.name)
            .map(str::to_owned)
            .or_else(|| base.map(|b| b.name.clone()))
            .ok_or(Reason::MissingParameterName)?;

        let code = match &self.code {
            Some(c) => c.as_u32().ok_or(Reason::CodeInvalid)?,
            None => base.map(|b| b.code).ok_or(Reason::MissingParameterCode)?,
        };
        if !is_valid_keypad_code(code) {
            return Err(Reason::CodeInvalid);
        }

        Ok(KeypadEntry {
            id: self.entry_id().or(base.map(|b| b.id)).unwrap_or(0),
            name,
            code,
            enabled: flag(&self.enabled, base.map(|b| b.enabled), true),
            window: self.window(base.map(|b| &b.window))?,
        })
    }

    /// Builds the time-control entry to write, on top of `base` for updates.
    pub fn time_control_entry<A: ActionKind>(
        &self,
        base: Option<&TimeControlEntry>,
    ) -> Result<TimeControlEntry, Reason> {
        let time = match non_empty(&self.time) {
            Some(t) => parse_time(t).ok_or(Reason::InvalidTime)?,
            None => base.map(|b| b.time).ok_or(Reason::MissingParameterTime)?,
        };

        let lock_action = match non_empty(&self.lock_action) {
            Some(a) => A::parse(a).ok_or(Reason::InvalidLockAction)?.as_str().to_owned(),
            None => base
                .map(|b| b.lock_action.clone())
                .ok_or(Reason::MissingParameterLockAction)?,
        };

        Ok(TimeControlEntry {
            id: self.entry_id().or(base.map(|b| b.id)).unwrap_or(0),
            enabled: flag(&self.enabled, base.map(|b| b.enabled), true),
            weekdays: self
                .weekdays
                .as_deref()
                .map(Weekdays::from_names)
                .or(base.map(|b| b.weekdays))
                .unwrap_or_default(),
            time,
            lock_action,
        })
    }

    /// Builds the authorization entry to write on top of `base`.
    pub fn authorization_entry(
        &self,
        base: &AuthorizationEntry,
    ) -> Result<AuthorizationEntry, Reason> {
        let name = non_empty(&self.name).unwrap_or(base.name.as_str()).to_owned();
        if name.is_empty() {
            return Err(Reason::MissingParameterName);
        }
        Ok(AuthorizationEntry {
            id: base.id,
            name,
            enabled: flag(&self.enabled, Some(base.enabled), true),
            remote_allowed: flag(&self.remote_allowed, Some(base.remote_allowed), false),
            window: self.window(Some(&base.window))?,
        })
    }

    fn window(&self, base: Option<&AccessWindow>) -> Result<AccessWindow, Reason> {
        Ok(AccessWindow {
            time_limited: flag(&self.time_limited, base.map(|b| b.time_limited), false),
            allowed_from: merge_date(
                &self.allowed_from,
                base.and_then(|b| b.allowed_from),
                Reason::InvalidAllowedFrom,
            )?,
            allowed_until: merge_date(
                &self.allowed_until,
                base.and_then(|b| b.allowed_until),
                Reason::InvalidAllowedUntil,
            )?,
            allowed_weekdays: self
                .allowed_weekdays
                .as_deref()
                .map(Weekdays::from_names)
                .or(base.map(|b| b.allowed_weekdays))
                .unwrap_or_default(),
            allowed_from_time: merge_time(
                &self.allowed_from_time,
                base.and_then(|b| b.allowed_from_time),
                Reason::InvalidAllowedFromTime,
            )?,
            allowed_until_time: merge_time(
                &self.allowed_until_time,
                base.and_then(|b| b.allowed_until_time),
                Reason::InvalidAllowedUntilTime,
            )?,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn flag(value: &Option<Scalar>, base: Option<bool>, default: bool) -> bool {
    value
        .as_ref()
        .map(Scalar::as_bool)
        .or(base)
        .unwrap_or(default)
}

fn optional_date(value: &Option<String>, reason: Reason) -> Result<(), Reason> {
    match non_empty(value) {
        Some(v) if parse_date_time(v).is_none() => Err(reason),
        _ => Ok(()),
    }
}

fn optional_time(value: &Option<String>, reason: Reason) -> Result<(), Reason> {
    match non_empty(value) {
        Some(v) if parse_time(v).is_none() => Err(reason),
        _ => Ok(()),
    }
}

// An explicitly empty string clears the field; an absent one keeps `base`.
fn merge_date(
    value: &Option<String>,
    base: Option<NaiveDateTime>,
    reason: Reason,
) -> Result<Option<NaiveDateTime>, Reason> {
    match value {
        None => Ok(base),
        Some(_) => match non_empty(value) {
            None => Ok(None),
            Some(v) => parse_date_time(v).map(Some).ok_or(reason),
        },
    }
}

fn merge_time(
    value: &Option<String>,
    base: Option<NaiveTime>,
    reason: Reason,
) -> Result<Option<NaiveTime>, Reason> {
    match value {
        None => Ok(base),
        Some(_) => match non_empty(value) {
            None => Ok(None),
            Some(v) => parse_time(v).map(Some).ok_or(reason),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::LockAction;

    fn keypad(id: u32) -> KeypadEntry {
        KeypadEntry {
            id,
            name: "Family".into(),
            code: 123456,
            enabled: true,
            window: AccessWindow {
                time_limited: true,
                allowed_from: parse_date_time("2024-01-01 00:00:00"),
                allowed_until: parse_date_time("2030-01-01 00:00:00"),
                allowed_weekdays: Weekdays(96),
                allowed_from_time: parse_time("08:00"),
                allowed_until_time: parse_time("18:00"),
            },
        }
    }

    #[test]
    fn parses_id_aliases_and_scalar_kinds() {
        let cmd = EntryCommand::from_json(r#"{"action":"update","codeId":"5","code":654321}"#)
            .unwrap();
        assert_eq!(cmd.entry_action(), Ok(EntryAction::Update));
        assert_eq!(cmd.entry_id(), Some(5));
        assert_eq!(cmd.code_value(), Some(654321));

        let cmd = EntryCommand::from_json(r#"{"action":"Delete","authId":7}"#).unwrap();
        assert_eq!(cmd.entry_action(), Ok(EntryAction::Delete));
        assert_eq!(cmd.entry_id(), Some(7));
    }

    #[test]
    fn rejects_non_objects_and_missing_action() {
        assert!(matches!(
            EntryCommand::from_json("[1,2]"),
            Err(ProtocolError::NotAnObject)
        ));
        assert!(EntryCommand::from_json("{").is_err());

        let cmd = EntryCommand::from_json("{}").unwrap();
        assert_eq!(cmd.entry_action(), Err(Reason::NoActionSet));
        let cmd = EntryCommand::from_json(r#"{"action":"rename"}"#).unwrap();
        assert_eq!(cmd.entry_action(), Err(Reason::InvalidAction));
    }

    #[test]
    fn add_requires_name_and_valid_code() {
        let cmd = EntryCommand::from_json(r#"{"action":"add","code":123456}"#).unwrap();
        assert_eq!(cmd.keypad_entry(None), Err(Reason::MissingParameterName));

        let cmd = EntryCommand::from_json(r#"{"action":"add","name":"Guest"}"#).unwrap();
        assert_eq!(cmd.keypad_entry(None), Err(Reason::MissingParameterCode));

        let cmd =
            EntryCommand::from_json(r#"{"action":"add","name":"Guest","code":"101010"}"#).unwrap();
        assert_eq!(cmd.validate_supplied::<LockAction>(), Err(Reason::CodeInvalid));
        assert_eq!(cmd.keypad_entry(None), Err(Reason::CodeInvalid));
    }

    #[test]
    fn update_merges_omitted_fields() {
        let base = keypad(5);
        let cmd = EntryCommand::from_json(r#"{"action":"update","codeId":5,"name":"Guest"}"#)
            .unwrap();
        let merged = cmd.keypad_entry(Some(&base)).unwrap();

        assert_eq!(merged.name, "Guest");
        assert_eq!(merged.code, base.code);
        assert_eq!(merged.enabled, base.enabled);
        assert_eq!(merged.window, base.window);
    }

    #[test]
    fn empty_string_clears_window_field() {
        let base = keypad(5);
        let cmd =
            EntryCommand::from_json(r#"{"action":"update","codeId":5,"allowedUntil":""}"#).unwrap();
        let merged = cmd.keypad_entry(Some(&base)).unwrap();
        assert_eq!(merged.window.allowed_until, None);
        assert_eq!(merged.window.allowed_from, base.window.allowed_from);
    }

    #[test]
    fn time_control_validation() {
        let cmd = EntryCommand::from_json(r#"{"action":"add","lockAction":"unlock"}"#).unwrap();
        assert_eq!(
            cmd.time_control_entry::<LockAction>(None),
            Err(Reason::MissingParameterTime)
        );

        let cmd = EntryCommand::from_json(r#"{"action":"add","time":"7:5x","lockAction":"unlock"}"#)
            .unwrap();
        assert_eq!(cmd.validate_supplied::<LockAction>(), Err(Reason::InvalidTime));

        let cmd =
            EntryCommand::from_json(r#"{"action":"add","time":"07:30","lockAction":"activateRTO"}"#)
                .unwrap();
        assert_eq!(
            cmd.time_control_entry::<LockAction>(None),
            Err(Reason::InvalidLockAction)
        );

        let cmd = EntryCommand::from_json(
            r#"{"action":"add","time":"07:30","lockAction":"Unlock","weekdays":["mon","fri"]}"#,
        )
        .unwrap();
        let entry = cmd.time_control_entry::<LockAction>(None).unwrap();
        assert_eq!(entry.lock_action, "unlock");
        assert_eq!(entry.weekdays, Weekdays(68));
    }

    #[test]
    fn window_date_validation() {
        let cmd = EntryCommand::from_json(
            r#"{"action":"add","name":"A","code":123456,"allowedFrom":"2024-13-01 00:00:00"}"#,
        )
        .unwrap();
        assert_eq!(
            cmd.validate_supplied::<LockAction>(),
            Err(Reason::InvalidAllowedFrom)
        );
    }
}

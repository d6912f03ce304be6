//! Compact ASCII wire protocol for the alarm clock.
//!
//! Commands are single-letter prefixed, colon-delimited text, kept under
//! ~20 bytes to fit small BLE payloads. Responses come in several formats
//! of different verbosity, including two alarm-record encodings; decoding
//! dispatches on the most specific prefix first.
//!
//! There are no request identifiers on the wire: responses correlate to
//! requests only by prefix. Callers that need precise per-call
//! confirmation must serialize their commands.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Names longer than this are truncated before transmission.
/// Display copies may be longer; the wire carries at most 8 bytes.
pub const MAX_NAME_WIRE_BYTES: usize = 8;

// ── Commands (client → device) ───────────────────────────────────────

/// Identifies an alarm on the device: by slot index or by name.
///
/// The device tries a numeric interpretation first, so a numeric string
/// always addresses a slot, never a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmTarget {
    Index(u32),
    Name(String),
}

impl fmt::Display for AlarmTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(n) => write!(f, "{n}"),
        }
    }
}

impl From<u32> for AlarmTarget {
    fn from(index: u32) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for AlarmTarget {
    /// Numeric strings become index targets, matching the device's own
    /// resolution order.
    fn from(s: &str) -> Self {
        match s.trim().parse::<u32>() {
            Ok(i) => Self::Index(i),
            Err(_) => Self::Name(s.trim().to_owned()),
        }
    }
}

/// Payload of an `add` command.
///
/// `vibration_strength` is deliberately absent: the observed device
/// command set does not carry it on the add command. Vibration is
/// configured out-of-band (see DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAlarm {
    pub hour: u8,
    pub minute: u8,
    /// Weekday restriction, 0 = Monday .. 6 = Sunday. `None` or empty
    /// means the alarm fires every day.
    pub days: Option<Vec<u8>>,
    pub name: Option<String>,
    pub recurring: bool,
}

/// One wire command. Exactly one command per message, no batching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Status,
    List,
    Remove(AlarmTarget),
    Toggle(AlarmTarget),
    Add(AddAlarm),
}

impl Command {
    /// Encode to the ASCII wire form.
    pub fn encode(&self) -> String {
        match self {
            Self::Ping => "p".to_owned(),
            Self::Status => "s".to_owned(),
            Self::List => "l".to_owned(),
            Self::Remove(target) => format!("r{target}"),
            Self::Toggle(target) => format!("t{target}"),
            Self::Add(add) => encode_add(add),
        }
    }
}

fn encode_add(add: &AddAlarm) -> String {
    let days = add
        .days
        .as_deref()
        .map(|days| {
            days.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();

    let name = add
        .name
        .as_deref()
        .map(|n| truncate_name(n.trim()))
        .unwrap_or_default();

    let flag = if add.recurring { 'R' } else { 'O' };

    format!("a{:02}:{:02}:{}:{}:{}", add.hour, add.minute, days, name, flag)
}

/// Truncate a name to [`MAX_NAME_WIRE_BYTES`], respecting char boundaries.
fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_WIRE_BYTES {
        return name;
    }
    let mut end = MAX_NAME_WIRE_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

// ── Events (device → client) ─────────────────────────────────────────

/// One alarm record, decoded from either the verbose `ALARM:` format or
/// one of the two compact `A<idx>:` forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub index: u32,
    pub name: String,
    pub hour: u8,
    pub minute: u8,
    pub enabled: bool,
    pub recurring: bool,
    /// Raw minutes-until from the compact formats. `None` when the field
    /// was absent or unparseable (the record itself still decodes).
    pub minutes_until: Option<i64>,
    /// Pre-formatted countdown text from the verbose format.
    pub time_until: Option<String>,
}

/// Device status snapshot. Replaced wholesale on every status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub time: String,
    pub alarm_count: u32,
    pub error_count: u32,
}

/// Which mutation a bare acknowledgment refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Added,
    Removed,
    Toggled,
}

/// A decoded wire response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// `OK:LIST:<n>`: a list transfer of `count` alarm records follows.
    ListStart { count: usize },
    /// An alarm record in any of the supported encodings.
    Alarm(AlarmRecord),
    /// `OK:STATUS:<time>:<alarms>:<errors>`.
    Status(StatusRecord),
    /// `OK:CLEAR` / `OK:ALARMS_CLEARED`: the device holds no alarms.
    ListCleared,
    /// `OK:ADDED:` / `OK:REMOVED:` / `OK:TOGGLE:`: operation kind only;
    /// the wire has no request ids to pair an ack with a specific call.
    Ack(AckKind),
    /// `ERROR:<message>`: the device rejected something. The connection
    /// itself remains healthy.
    Error { message: String },
    /// `HEARTBEAT:` keepalive, roughly once a minute.
    Heartbeat,
    /// Anything unrecognized, raw text preserved for external listeners.
    Unknown { raw: String },
}

/// Decode one response frame.
///
/// Never panics and never errors: malformed alarm records return `None`
/// (logged here, discarded by the caller), and text that matches no
/// known prefix comes back as [`DeviceEvent::Unknown`].
pub fn decode(text: &str) -> Option<DeviceEvent> {
    let text = text.trim();

    if let Some(rest) = text.strip_prefix("OK:LIST:") {
        let count = rest.split(':').next().and_then(|n| n.parse().ok()).unwrap_or(0);
        return Some(DeviceEvent::ListStart { count });
    }

    if text.starts_with("OK:STATUS:") {
        return decode_status(text);
    }

    if text == "OK:CLEAR" || text == "OK:ALARMS_CLEARED" {
        return Some(DeviceEvent::ListCleared);
    }

    if text.starts_with("OK:ADDED:") {
        return Some(DeviceEvent::Ack(AckKind::Added));
    }
    if text.starts_with("OK:REMOVED:") {
        return Some(DeviceEvent::Ack(AckKind::Removed));
    }
    if text.starts_with("OK:TOGGLE:") {
        return Some(DeviceEvent::Ack(AckKind::Toggled));
    }

    if text.starts_with("ALARM:") {
        return decode_verbose_alarm(text);
    }

    if is_compact_alarm(text) {
        return decode_compact_alarm(text);
    }

    if let Some(message) = text.strip_prefix("ERROR:") {
        return Some(DeviceEvent::Error {
            message: message.to_owned(),
        });
    }

    if text.starts_with("HEARTBEAT:") {
        return Some(DeviceEvent::Heartbeat);
    }

    Some(DeviceEvent::Unknown {
        raw: text.to_owned(),
    })
}

/// `OK:STATUS:<time>:<alarms>:<errors>`.
///
/// The device clock text itself contains colons (`2025-05-23_14:30:00`),
/// so the two counters are taken from the end and everything between the
/// prefix and them is rejoined as the time string.
fn decode_status(text: &str) -> Option<DeviceEvent> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() < 5 {
        tracing::debug!(raw = text, "malformed status response dropped");
        return None;
    }

    let error_count = parts[parts.len() - 1].parse().unwrap_or(0);
    let alarm_count = parts[parts.len() - 2].parse().unwrap_or(0);
    let time = parts[2..parts.len() - 2].join(":");

    Some(DeviceEvent::Status(StatusRecord {
        time,
        alarm_count,
        error_count,
    }))
}

/// `ALARM:<idx>:<name>:<HH>:<MM>:<ON|OFF>:<R|O>:<time_until>`.
///
/// The trailing countdown text may itself contain colons; everything
/// after the recurring flag is rejoined.
fn decode_verbose_alarm(text: &str) -> Option<DeviceEvent> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() < 8 {
        tracing::debug!(raw = text, "malformed verbose alarm record dropped");
        return None;
    }

    let record = (|| {
        let index = parts[1].parse().ok()?;
        let name = parts[2].to_owned();
        let (hour, minute) = parse_hour_minute(parts[3], parts[4])?;
        let enabled = match parts[5] {
            "ON" => true,
            "OFF" => false,
            _ => return None,
        };
        let recurring = match parts[6] {
            "R" => true,
            "O" => false,
            _ => return None,
        };
        let time_until = parts[7..].join(":");

        Some(AlarmRecord {
            index,
            name,
            hour,
            minute,
            enabled,
            recurring,
            minutes_until: None,
            time_until: Some(time_until),
        })
    })();

    match record {
        Some(record) => Some(DeviceEvent::Alarm(record)),
        None => {
            tracing::debug!(raw = text, "malformed verbose alarm record dropped");
            None
        }
    }
}

/// `A<digits>` immediately followed by `:`.
fn is_compact_alarm(text: &str) -> bool {
    let Some(rest) = text.strip_prefix('A') else {
        return false;
    };
    let digits: &str = match rest.find(':') {
        Some(pos) => &rest[..pos],
        None => return false,
    };
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Compact alarm records, disambiguated by colon-field count:
///
/// - 6 fields: `A<idx>:<name>:<HHMM>:<0|1>:<0|1>:<mins>`
/// - 4 fields: `A<idx>:<HHMM>:<er>:<mins>` with a two-char flag string;
///   the name is synthesized as `"Alarm <idx>"`.
///
/// Any other field count is a decode failure for the whole message.
fn decode_compact_alarm(text: &str) -> Option<DeviceEvent> {
    let parts: Vec<&str> = text.split(':').collect();
    let index: u32 = parts[0][1..].parse().ok()?;

    let record = match parts.len() {
        6 => {
            let (hour, minute) = parse_hhmm(parts[2])?;
            let enabled = parse_flag_digit(parts[3])?;
            let recurring = parse_flag_digit(parts[4])?;
            AlarmRecord {
                index,
                name: parts[1].to_owned(),
                hour,
                minute,
                enabled,
                recurring,
                minutes_until: parts[5].parse().ok(),
                time_until: None,
            }
        }
        4 => {
            let (hour, minute) = parse_hhmm(parts[1])?;
            let flags = parts[2].as_bytes();
            if flags.len() != 2 {
                tracing::debug!(raw = text, "malformed compact alarm flags dropped");
                return None;
            }
            let enabled = match flags[0] {
                b'1' => true,
                b'0' => false,
                _ => return None,
            };
            let recurring = match flags[1] {
                b'1' => true,
                b'0' => false,
                _ => return None,
            };
            AlarmRecord {
                index,
                name: format!("Alarm {index}"),
                hour,
                minute,
                enabled,
                recurring,
                minutes_until: parts[3].parse().ok(),
                time_until: None,
            }
        }
        _ => {
            tracing::debug!(
                raw = text,
                fields = parts.len(),
                "compact alarm record with unexpected field count dropped"
            );
            return None;
        }
    };

    Some(DeviceEvent::Alarm(record))
}

fn parse_flag_digit(s: &str) -> Option<bool> {
    match s {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

/// `HHMM` is exactly 4 digits, hour 0-23, minute 0-59.
fn parse_hhmm(s: &str) -> Option<(u8, u8)> {
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    validate_hour_minute(s[..2].parse().ok()?, s[2..].parse().ok()?)
}

fn parse_hour_minute(hh: &str, mm: &str) -> Option<(u8, u8)> {
    validate_hour_minute(hh.parse().ok()?, mm.parse().ok()?)
}

fn validate_hour_minute(hour: u8, minute: u8) -> Option<(u8, u8)> {
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

// ── Countdown humanization ───────────────────────────────────────────

/// Render raw minutes-until as human text.
///
/// This is a presentation step, separate from decoding: the decoder only
/// ever carries the raw numeric. Buckets deliberately do not special-case
/// singular units (`"1 minutes"`), matching the device's own formatter.
pub fn humanize_minutes(minutes: i64) -> String {
    if minutes < 0 {
        return "unknown".to_owned();
    }
    if minutes == 0 {
        return "now".to_owned();
    }
    if minutes < 60 {
        return format!("{minutes} minutes");
    }
    if minutes < 1440 {
        let hours = minutes / 60;
        let rem = minutes % 60;
        return if rem > 0 {
            format!("{hours} hours and {rem} minutes")
        } else {
            format!("{hours} hours")
        };
    }
    let days = minutes / 1440;
    let hours = (minutes % 1440) / 60;
    if hours > 0 {
        format!("{days} days and {hours} hours")
    } else {
        format!("{days} days")
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn encode_simple_commands() {
        assert_eq!(Command::Ping.encode(), "p");
        assert_eq!(Command::Status.encode(), "s");
        assert_eq!(Command::List.encode(), "l");
        assert_eq!(Command::Remove(AlarmTarget::Index(3)).encode(), "r3");
        assert_eq!(
            Command::Toggle(AlarmTarget::Name("Gym".into())).encode(),
            "tGym"
        );
    }

    #[test]
    fn encode_add_daily_unnamed() {
        let cmd = Command::Add(AddAlarm {
            hour: 7,
            minute: 30,
            days: None,
            name: None,
            recurring: true,
        });
        assert_eq!(cmd.encode(), "a07:30:::R");
    }

    #[test]
    fn encode_add_weekday_named_one_time() {
        let cmd = Command::Add(AddAlarm {
            hour: 6,
            minute: 5,
            days: Some(vec![0, 1, 2, 3, 4]),
            name: Some("Work".into()),
            recurring: false,
        });
        assert_eq!(cmd.encode(), "a06:05:0,1,2,3,4:Work:O");
    }

    #[test]
    fn encode_add_truncates_long_names() {
        let cmd = Command::Add(AddAlarm {
            hour: 9,
            minute: 0,
            days: None,
            name: Some("Weekend Morning Run".into()),
            recurring: true,
        });
        assert_eq!(cmd.encode(), "a09:00::Weekend :R");
    }

    #[test]
    fn name_truncation_respects_char_boundaries() {
        // 4 two-byte chars = 8 bytes, the 5th would split a char.
        assert_eq!(truncate_name("ééééé"), "éééé");
    }

    #[test]
    fn numeric_target_strings_become_indices() {
        assert_eq!(AlarmTarget::from("5"), AlarmTarget::Index(5));
        assert_eq!(AlarmTarget::from("Gym"), AlarmTarget::Name("Gym".into()));
    }

    #[test]
    fn decode_list_start() {
        assert_eq!(
            decode("OK:LIST:3"),
            Some(DeviceEvent::ListStart { count: 3 })
        );
        // Unparseable count defaults to 0.
        assert_eq!(
            decode("OK:LIST:garbage"),
            Some(DeviceEvent::ListStart { count: 0 })
        );
    }

    #[test]
    fn decode_verbose_alarm_record() {
        let event = decode("ALARM:0:Morning:07:30:ON:R:in 8 hours").unwrap();
        assert_eq!(
            event,
            DeviceEvent::Alarm(AlarmRecord {
                index: 0,
                name: "Morning".into(),
                hour: 7,
                minute: 30,
                enabled: true,
                recurring: true,
                minutes_until: None,
                time_until: Some("in 8 hours".into()),
            })
        );
    }

    #[test]
    fn verbose_alarm_rejoins_colons_in_countdown() {
        let event = decode("ALARM:1:Work:06:30:OFF:O:at 06:30 tomorrow").unwrap();
        let DeviceEvent::Alarm(record) = event else {
            panic!("expected alarm record");
        };
        assert_eq!(record.time_until.as_deref(), Some("at 06:30 tomorrow"));
        assert!(!record.enabled);
        assert!(!record.recurring);
    }

    #[test]
    fn decode_compact_full_form() {
        let event = decode("A0:Morning:1942:1:1:90").unwrap();
        assert_eq!(
            event,
            DeviceEvent::Alarm(AlarmRecord {
                index: 0,
                name: "Morning".into(),
                hour: 19,
                minute: 42,
                enabled: true,
                recurring: true,
                minutes_until: Some(90),
                time_until: None,
            })
        );
    }

    #[test]
    fn decode_compact_ultra_form_synthesizes_name() {
        let event = decode("A0:1942:11:90").unwrap();
        assert_eq!(
            event,
            DeviceEvent::Alarm(AlarmRecord {
                index: 0,
                name: "Alarm 0".into(),
                hour: 19,
                minute: 42,
                enabled: true,
                recurring: true,
                minutes_until: Some(90),
                time_until: None,
            })
        );
    }

    #[test]
    fn compact_out_of_range_hour_is_a_decode_failure() {
        assert_eq!(decode("A0:2542:11:90"), None);
        assert_eq!(decode("A0:Morning:2542:1:1:90"), None);
    }

    #[test]
    fn compact_bad_minute_and_short_hhmm_fail() {
        assert_eq!(decode("A0:1961:11:90"), None);
        assert_eq!(decode("A0:942:11:90"), None);
    }

    #[test]
    fn compact_wrong_field_count_fails() {
        assert_eq!(decode("A0:Morning:1942:1:1:90:extra"), None);
        assert_eq!(decode("A0:1942:11"), None);
    }

    #[test]
    fn compact_unparseable_minutes_still_decodes() {
        let DeviceEvent::Alarm(record) = decode("A2:1942:10:soon").unwrap() else {
            panic!("expected alarm record");
        };
        assert_eq!(record.minutes_until, None);
        assert!(record.enabled);
        assert!(!record.recurring);
    }

    #[test]
    fn decode_status_with_colons_in_device_time() {
        let event = decode("OK:STATUS:2025-05-23_14:30:00:3:1").unwrap();
        assert_eq!(
            event,
            DeviceEvent::Status(StatusRecord {
                time: "2025-05-23_14:30:00".into(),
                alarm_count: 3,
                error_count: 1,
            })
        );
    }

    #[test]
    fn decode_clear_variants() {
        assert_eq!(decode("OK:CLEAR"), Some(DeviceEvent::ListCleared));
        assert_eq!(decode("OK:ALARMS_CLEARED"), Some(DeviceEvent::ListCleared));
    }

    #[test]
    fn decode_acks_carry_kind_only() {
        assert_eq!(
            decode("OK:ADDED:Gym:07:30:in 90 minutes"),
            Some(DeviceEvent::Ack(AckKind::Added))
        );
        assert_eq!(decode("OK:REMOVED:2"), Some(DeviceEvent::Ack(AckKind::Removed)));
        assert_eq!(
            decode("OK:TOGGLE:Gym:OFF"),
            Some(DeviceEvent::Ack(AckKind::Toggled))
        );
    }

    #[test]
    fn decode_error_and_heartbeat() {
        assert_eq!(
            decode("ERROR:Hour must be 0-23"),
            Some(DeviceEvent::Error {
                message: "Hour must be 0-23".into()
            })
        );
        assert_eq!(decode("HEARTBEAT:OK"), Some(DeviceEvent::Heartbeat));
    }

    #[test]
    fn unmatched_text_is_preserved_raw() {
        assert_eq!(
            decode("OK:PONG"),
            Some(DeviceEvent::Unknown {
                raw: "OK:PONG".into()
            })
        );
    }

    #[test]
    fn encode_then_decode_echoed_alarm_round_trips() {
        for (hour, minute) in [(0u8, 0u8), (7, 30), (23, 59), (12, 1)] {
            let echoed = format!("ALARM:4:Gym:{hour:02}:{minute:02}:ON:R:soon");
            let DeviceEvent::Alarm(record) = decode(&echoed).unwrap() else {
                panic!("expected alarm record");
            };
            assert_eq!((record.hour, record.minute), (hour, minute));
            assert!(record.enabled);
            assert!(record.recurring);
        }
    }

    #[test]
    fn humanize_buckets() {
        assert_eq!(humanize_minutes(-5), "unknown");
        assert_eq!(humanize_minutes(0), "now");
        assert_eq!(humanize_minutes(1), "1 minutes");
        assert_eq!(humanize_minutes(59), "59 minutes");
        assert_eq!(humanize_minutes(60), "1 hours");
        assert_eq!(humanize_minutes(90), "1 hours and 30 minutes");
        assert_eq!(humanize_minutes(1439), "23 hours and 59 minutes");
        assert_eq!(humanize_minutes(1440), "1 days");
        assert_eq!(humanize_minutes(1500), "1 days and 1 hours");
        assert_eq!(humanize_minutes(2880), "2 days");
    }
}

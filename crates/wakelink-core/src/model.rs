//! Domain model: alarms as the store holds them, device status, and
//! validated alarm requests.

use serde::{Deserialize, Serialize};
use wakelink_ble::{AddAlarm, AlarmRecord, StatusRecord};
use wakelink_ble::wire::humanize_minutes;

use crate::error::CoreError;

/// Vibration strength applied to new alarms when the caller does not
/// pick one. The wire add command has no vibration field; the value is
/// client-side state only.
pub const DEFAULT_VIBRATION_STRENGTH: u8 = 75;

/// Countdown label for disabled alarms.
pub const DISABLED_LABEL: &str = "disabled";

// ── Alarm ───────────────────────────────────────────────────────────

/// One alarm as presented to the UI layer.
///
/// `index` is the device-assigned slot and the identity used for
/// merging; everything else is display state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub index: u32,
    pub name: String,
    pub hour: u8,
    pub minute: u8,
    pub enabled: bool,
    pub recurring: bool,
    /// Weekday restriction, 0 = Monday .. 6 = Sunday. The device never
    /// reports this back, so it is only known for locally created alarms.
    #[serde(default)]
    pub days: Option<Vec<u8>>,
    /// Client-side only, never transmitted.
    #[serde(default)]
    pub vibration_strength: Option<u8>,
    /// Human-readable countdown, recomputed periodically from the local
    /// clock between device refreshes.
    #[serde(default)]
    pub time_until: String,
}

impl Alarm {
    /// Trigger time as minutes past midnight, for chronological sorting.
    pub fn minutes_of_day(&self) -> u32 {
        u32::from(self.hour) * 60 + u32::from(self.minute)
    }
}

impl From<AlarmRecord> for Alarm {
    fn from(rec: AlarmRecord) -> Self {
        let time_until = rec
            .time_until
            .or_else(|| rec.minutes_until.map(humanize_minutes))
            .unwrap_or_else(|| "unknown".to_owned());
        Self {
            index: rec.index,
            name: rec.name,
            hour: rec.hour,
            minute: rec.minute,
            enabled: rec.enabled,
            recurring: rec.recurring,
            days: None,
            vibration_strength: None,
            time_until,
        }
    }
}

// ── Device status ───────────────────────────────────────────────────

/// Snapshot of the device's health, replaced wholesale on every status
/// response and dropped on disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub time: String,
    pub alarm_count: u32,
    pub error_count: u32,
}

impl From<StatusRecord> for DeviceStatus {
    fn from(rec: StatusRecord) -> Self {
        Self {
            time: rec.time,
            alarm_count: rec.alarm_count,
            error_count: rec.error_count,
        }
    }
}

// ── New-alarm requests ──────────────────────────────────────────────

/// A request to create an alarm, or the replacement half of an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlarm {
    pub hour: u8,
    pub minute: u8,
    /// Weekday restriction, 0 = Monday .. 6 = Sunday. `None` or an
    /// empty set means daily.
    pub days: Option<Vec<u8>>,
    /// Defaults to `Alarm <index>` once the slot is known.
    pub name: Option<String>,
    pub recurring: bool,
    pub vibration_strength: Option<u8>,
}

impl NewAlarm {
    /// A recurring daily alarm at the given time.
    pub fn at(hour: u8, minute: u8) -> Self {
        Self {
            hour,
            minute,
            days: None,
            name: None,
            recurring: true,
            vibration_strength: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), CoreError> {
        if self.hour > 23 {
            return Err(CoreError::InvalidAlarm {
                message: format!("hour {} out of range", self.hour),
            });
        }
        if self.minute > 59 {
            return Err(CoreError::InvalidAlarm {
                message: format!("minute {} out of range", self.minute),
            });
        }
        if let Some(days) = &self.days {
            if let Some(bad) = days.iter().find(|d| **d > 6) {
                return Err(CoreError::InvalidAlarm {
                    message: format!("weekday {bad} out of range"),
                });
            }
        }
        if let Some(strength) = self.vibration_strength {
            if strength > 100 {
                return Err(CoreError::InvalidAlarm {
                    message: format!("vibration strength {strength} out of range"),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn to_wire(&self) -> AddAlarm {
        AddAlarm {
            hour: self.hour,
            minute: self.minute,
            days: self.days.clone(),
            name: self.name.clone(),
            recurring: self.recurring,
        }
    }
}

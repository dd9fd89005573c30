//! Daylight-saving period calculation.
//!
//! Inputs are "normal time" (standard local time, no DST applied) together with
//! the standard UTC hour offset of the zone.

use crate::clock::civil_from_epoch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which daylight-saving rule-set applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DstZone {
    #[default]
    None,
    /// Last Sunday of March 01:00 UTC until last Sunday of October 01:00 UTC.
    Eu,
    /// Second Sunday of March 02:00 local until first Sunday of November 02:00 local.
    Usa,
}

impl fmt::Display for DstZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DstZone::None => "none",
            DstZone::Eu => "eu",
            DstZone::Usa => "usa",
        };
        f.write_str(name)
    }
}

impl FromStr for DstZone {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(DstZone::None),
            "eu" => Ok(DstZone::Eu),
            "usa" | "us" => Ok(DstZone::Usa),
            other => Err(anyhow::anyhow!("unknown DST zone '{}'", other)),
        }
    }
}

/// Whether the given standard-time moment is inside the summer period.
/// `weekday` is 1 = Sunday ... 7 = Saturday.
pub fn is_dst(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    weekday: u32,
    utc_hours: i8,
    zone: DstZone,
) -> bool {
    match zone {
        DstZone::None => false,
        DstZone::Eu => is_dst_eu(year, month, day as i32, hour as i32, utc_hours as i32),
        DstZone::Usa => is_dst_usa(month, day as i32, hour, weekday as i32),
    }
}

/// Same as [`is_dst`] for an epoch moment already shifted to local standard time.
pub fn is_dst_at(moment: i64, utc_hours: i8, zone: DstZone) -> bool {
    if zone == DstZone::None {
        return false;
    }
    let t = civil_from_epoch(moment);
    is_dst(t.year, t.month, t.day, t.hour, t.weekday, utc_hours, zone)
}

fn is_dst_eu(year: i32, month: u32, day: i32, hour: i32, tz_hours: i32) -> bool {
    if !(3..=10).contains(&month) {
        return false;
    }
    if month > 3 && month < 10 {
        return true;
    }

    // Hours since the start of the month, compared against the switch hour
    // (01:00 UTC expressed in local standard time) on the last Sunday.
    let hours_in_month = hour + 24 * day;
    if month == 3 {
        let last_sunday = 31 - (5 * year / 4 + 4) % 7;
        hours_in_month >= 1 + tz_hours + 24 * last_sunday
    } else {
        let last_sunday = 31 - (5 * year / 4 + 1) % 7;
        hours_in_month < 1 + tz_hours + 24 * last_sunday
    }
}

fn is_dst_usa(month: u32, day: i32, hour: u32, weekday: i32) -> bool {
    if !(3..=11).contains(&month) {
        return false;
    }
    if month > 3 && month < 11 {
        return true;
    }

    let first_sunday = (7 + day - weekday).rem_euclid(7) + 1;

    if month == 3 {
        let second_sunday = first_sunday + 7;
        if day != second_sunday {
            return day > second_sunday;
        }
        return hour >= 2;
    }

    // November
    if day != first_sunday {
        return day < first_sunday;
    }
    hour < 2
}

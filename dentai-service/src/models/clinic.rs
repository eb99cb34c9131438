//! Static clinic data shown on the dashboard.

use serde::Serialize;
use std::fmt;

/// Display colour tag for a quick stat card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatColor {
    Blue,
    Green,
    Purple,
    Red,
}

/// A hardcoded dashboard figure. Not derived from any computation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuickStat {
    pub label: &'static str,
    pub value: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<&'static str>,
    pub color: StatColor,
}

pub const QUICK_STATS: [QuickStat; 4] = [
    QuickStat {
        label: "Appointments",
        value: "5",
        trend: Some("+2 vs yesterday"),
        color: StatColor::Blue,
    },
    QuickStat {
        label: "Revenue Est.",
        value: "$3.2k",
        trend: Some("On target"),
        color: StatColor::Green,
    },
    QuickStat {
        label: "New Patients",
        value: "1",
        trend: None,
        color: StatColor::Purple,
    },
    QuickStat {
        label: "Inventory Alert",
        value: "Gloves",
        trend: Some("Low Stock"),
        color: StatColor::Red,
    },
];

/// One slot in the day's schedule.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Appointment {
    pub time: &'static str,
    pub patient: &'static str,
    pub reason: &'static str,
}

impl fmt::Display for Appointment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "- {}: {} ({})", self.time, self.patient, self.reason)
    }
}

pub const DAILY_SCHEDULE: [Appointment; 5] = [
    Appointment {
        time: "09:00 AM",
        patient: "John Doe",
        reason: "Checkup",
    },
    Appointment {
        time: "10:30 AM",
        patient: "Sarah Smith",
        reason: "Root Canal",
    },
    Appointment {
        time: "01:00 PM",
        patient: "Mike Johnson",
        reason: "Cleaning",
    },
    Appointment {
        time: "02:30 PM",
        patient: "Emily Davis",
        reason: "Whitening Consultation",
    },
    Appointment {
        time: "04:00 PM",
        patient: "Robert Wilson",
        reason: "Emergency - Tooth Pain",
    },
];

/// Render a schedule as one bullet line per appointment.
pub fn schedule_listing(schedule: &[Appointment]) -> String {
    schedule
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

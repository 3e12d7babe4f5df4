use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::calendar::{Term, YearBucket};

/// Canonical rendering of every date written to an output table.
pub const DATE_FORMAT: &str = "%Y%m%d";

/// Descriptive attributes of a student, keyed by canonical field name.
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum EventType {
    Applications,
    Appointments,
    #[serde(rename = "Career_Fairs")]
    CareerFairs,
    Events,
    Logins,
    Presentations,
    Surveys,
}

impl EventType {
    /// Event types counted by the aggregate reports unless configured otherwise.
    pub const COUNTED: [EventType; 5] = [
        EventType::Applications,
        EventType::Appointments,
        EventType::CareerFairs,
        EventType::Events,
        EventType::Logins,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Applications => "Applications",
            EventType::Appointments => "Appointments",
            EventType::CareerFairs => "Career_Fairs",
            EventType::Events => "Events",
            EventType::Logins => "Logins",
            EventType::Presentations => "Presentations",
            EventType::Surveys => "Surveys",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a record came from. The derived ordering is the source priority used
/// to reconcile descriptive attributes and to break same-day ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    Enrollment,
    Engagement(EventType),
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Enrollment => f.write_str("Enrollment"),
            SourceKind::Engagement(event_type) => f.write_str(event_type.as_str()),
        }
    }
}

/// One normalized row from an engagement export.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementRecord {
    pub student_id: String,
    pub attributes: Attributes,
    pub event_type: EventType,
    pub subtype: Option<String>,
    pub date: NaiveDate,
}

/// One row of the registrar export: class standing for a student in a term.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentRecord {
    pub student_id: String,
    pub term: Term,
    pub standing: YearBucket,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub event_type: EventType,
    pub date: NaiveDate,
    pub subtype: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentTimeline {
    pub student_id: String,
    pub attributes: Attributes,
    pub events: Vec<TimelineEvent>,
}

impl StudentTimeline {
    /// Events of `event_type`, in timeline order.
    pub fn occurrences(&self, event_type: EventType) -> impl Iterator<Item = &TimelineEvent> {
        self.events
            .iter()
            .filter(move |event| event.event_type == event_type)
    }
}

/// Students ordered by id, each with events in ascending date order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    pub descriptive_columns: Vec<String>,
    pub students: Vec<StudentTimeline>,
}

/// Date span of interest for one student. `from` is inclusive, `until` is
/// exclusive; `None` leaves that side open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub student_id: String,
    pub anchor: Option<EventType>,
    pub from: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

impl Window {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.until.map_or(true, |until| date < until)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub student_id: String,
    pub attributes: Attributes,
    pub counts: BTreeMap<EventType, u32>,
    pub term_counts: BTreeMap<(EventType, Term), u32>,
}

impl AggregateRow {
    pub fn count(&self, event_type: EventType) -> u32 {
        self.counts.get(&event_type).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeltedRow {
    pub student_id: String,
    pub attributes: Attributes,
    pub event_type: EventType,
    pub count: u32,
    pub year_bucket: YearBucket,
}

/// A named output table, handed to the CSV writer as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(name: impl Into<String>, headers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows: Vec::new(),
        }
    }
}

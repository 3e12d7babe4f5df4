//! Anchor-based window selection for the derived report families.
//!
//! Every selector returns a [`Selection`]: the window chosen for each
//! qualifying student and the sub-timeline of counted events inside it.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, trace};

use crate::models::{EventType, StudentTimeline, Timeline, TimelineEvent, Window};

/// Identifies anchor records: an event type, optionally narrowed to records
/// whose subtype equals `tag` (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRule {
    pub event_type: EventType,
    pub tag: Option<String>,
}

impl AnchorRule {
    pub fn matches(&self, event: &TimelineEvent) -> bool {
        if event.event_type != self.event_type {
            return false;
        }
        match (&self.tag, &event.subtype) {
            (None, _) => true,
            (Some(tag), Some(subtype)) => subtype.trim().eq_ignore_ascii_case(tag.trim()),
            (Some(_), None) => false,
        }
    }

    fn occurrences<'a>(&'a self, student: &'a StudentTimeline) -> impl Iterator<Item = &'a TimelineEvent> {
        student.events.iter().filter(move |event| self.matches(event))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub windows: Vec<Window>,
    /// Counted events inside each window; students left with no events are
    /// dropped here.
    pub timeline: Timeline,
}

/// COM1100 cohorts by number of presentations attended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PresentationBucket {
    None,
    Single,
    Multiple,
}

impl PresentationBucket {
    pub const ALL: [PresentationBucket; 3] = [
        PresentationBucket::None,
        PresentationBucket::Single,
        PresentationBucket::Multiple,
    ];

    pub fn for_count(count: usize) -> Self {
        match count {
            0 => PresentationBucket::None,
            1 => PresentationBucket::Single,
            _ => PresentationBucket::Multiple,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PresentationBucket::None => "none",
            PresentationBucket::Single => "single",
            PresentationBucket::Multiple => "multiple",
        }
    }
}

/// Window opening on the date of the `ordinal`-th (1-based) anchor record.
/// Events are already in (date, source priority) order, so same-day anchors
/// resolve deterministically.
pub fn anchored_window(student: &StudentTimeline, rule: &AnchorRule, ordinal: usize) -> Option<Window> {
    let anchor = rule.occurrences(student).nth(ordinal.checked_sub(1)?)?;
    Some(Window {
        student_id: student.student_id.clone(),
        anchor: Some(rule.event_type),
        from: Some(anchor.date),
        until: None,
    })
}

pub fn full_history(student: &StudentTimeline) -> Window {
    Window {
        student_id: student.student_id.clone(),
        anchor: None,
        from: None,
        until: None,
    }
}

/// Cuts `timeline` down to the given windows, keeping only `counted` types.
pub fn apply_windows(timeline: &Timeline, windows: Vec<Window>, counted: &[EventType]) -> Selection {
    let mut students = Vec::new();
    for window in &windows {
        let Ok(index) = timeline
            .students
            .binary_search_by(|student| student.student_id.as_str().cmp(window.student_id.as_str()))
        else {
            continue;
        };
        let student = &timeline.students[index];
        let events: Vec<TimelineEvent> = student
            .events
            .iter()
            .filter(|event| counted.contains(&event.event_type) && window.contains(event.date))
            .cloned()
            .collect();
        if events.is_empty() {
            trace!(student = %window.student_id, anchor = ?window.anchor, "window holds no counted events");
            continue;
        }
        students.push(StudentTimeline {
            student_id: student.student_id.clone(),
            attributes: student.attributes.clone(),
            events,
        });
    }

    Selection {
        windows,
        timeline: Timeline {
            descriptive_columns: timeline.descriptive_columns.clone(),
            students,
        },
    }
}

/// Everything on or after each student's first CLDC appointment. Students
/// without one are not part of the report.
pub fn select_cldc(timeline: &Timeline, rule: &AnchorRule, counted: &[EventType]) -> Selection {
    let windows: Vec<Window> = timeline
        .students
        .iter()
        .filter_map(|student| anchored_window(student, rule, 1))
        .collect();
    debug!(students = windows.len(), "selected CLDC windows");
    apply_windows(timeline, windows, counted)
}

/// Splits students into the 0 / 1 / 2+ presentation buckets. Bucket 1 opens
/// at the presentation, bucket 2+ at the second presentation, bucket 0 spans
/// the whole history and is limited to `cohort` when one is given.
pub fn partition_com1100(
    timeline: &Timeline,
    rule: &AnchorRule,
    cohort: Option<&HashSet<&str>>,
    counted: &[EventType],
) -> BTreeMap<PresentationBucket, Selection> {
    let mut windows: BTreeMap<PresentationBucket, Vec<Window>> = PresentationBucket::ALL
        .iter()
        .map(|bucket| (*bucket, Vec::new()))
        .collect();

    for student in &timeline.students {
        let bucket = PresentationBucket::for_count(rule.occurrences(student).count());
        let window = match bucket {
            PresentationBucket::None => {
                let in_cohort =
                    cohort.map_or(true, |cohort| cohort.contains(student.student_id.as_str()));
                in_cohort.then(|| full_history(student))
            }
            PresentationBucket::Single => anchored_window(student, rule, 1),
            PresentationBucket::Multiple => anchored_window(student, rule, 2),
        };
        if let Some(window) = window {
            windows.entry(bucket).or_default().push(window);
        }
    }

    windows
        .into_iter()
        .map(|(bucket, windows)| {
            debug!(bucket = bucket.as_str(), students = windows.len(), "selected COM1100 windows");
            (bucket, apply_windows(timeline, windows, counted))
        })
        .collect()
}

/// Engagement strictly before each surveyed student's first survey response.
/// `require` narrows the population by descriptive attribute.
pub fn select_fds(
    timeline: &Timeline,
    counted: &[EventType],
    require: &BTreeMap<String, String>,
) -> Selection {
    let windows: Vec<Window> = timeline
        .students
        .iter()
        .filter(|student| {
            require.iter().all(|(field, expected)| {
                student
                    .attributes
                    .get(field)
                    .is_some_and(|value| value.trim().eq_ignore_ascii_case(expected.trim()))
            })
        })
        .filter_map(|student| {
            let survey = student.occurrences(EventType::Surveys).next()?;
            Some(Window {
                student_id: student.student_id.clone(),
                anchor: Some(EventType::Surveys),
                from: None,
                until: Some(survey.date),
            })
        })
        .collect();
    debug!(students = windows.len(), "selected FDS windows");
    apply_windows(timeline, windows, counted)
}

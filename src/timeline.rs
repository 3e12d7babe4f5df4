use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::models::{
    Attributes, EngagementRecord, EnrollmentRecord, EventType, SourceKind, StudentTimeline,
    Timeline, TimelineEvent,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub students: usize,
    pub events: usize,
    /// Descriptive values discarded because a higher-priority source already
    /// supplied a different one.
    pub conflicts: usize,
}

/// Collects normalized sources and merges them into a [`Timeline`].
///
/// Descriptive attributes are reconciled in source priority order
/// (enrollment, then engagement sources in [`EventType`] order, rows in file
/// order): the first non-empty value wins. Events are stably sorted by date,
/// so same-day events keep that same priority order.
#[derive(Debug, Default)]
pub struct TimelineBuilder {
    descriptive_columns: Vec<String>,
    enrollment: Vec<EnrollmentRecord>,
    sources: BTreeMap<EventType, Vec<EngagementRecord>>,
}

impl TimelineBuilder {
    pub fn new(descriptive_columns: Vec<String>) -> Self {
        Self {
            descriptive_columns,
            ..Self::default()
        }
    }

    pub fn add_enrollment(&mut self, records: Vec<EnrollmentRecord>) {
        debug!(records = records.len(), "added enrollment to timeline");
        self.enrollment.extend(records);
    }

    pub fn add_source(&mut self, event_type: EventType, records: Vec<EngagementRecord>) {
        debug!(source = %event_type, records = records.len(), "added source to timeline");
        self.sources.entry(event_type).or_default().extend(records);
    }

    pub fn build(self) -> (Timeline, BuildStats) {
        let mut stats = BuildStats::default();
        let mut columns = self.descriptive_columns;
        let mut profiles: BTreeMap<String, Attributes> = BTreeMap::new();
        let mut events: BTreeMap<String, Vec<TimelineEvent>> = BTreeMap::new();

        for record in &self.enrollment {
            let profile = profiles.entry(record.student_id.clone()).or_default();
            merge_attributes(
                profile,
                &record.attributes,
                &record.student_id,
                SourceKind::Enrollment,
                &mut columns,
                &mut stats,
            );
        }

        for (event_type, records) in self.sources {
            for record in records {
                let profile = profiles.entry(record.student_id.clone()).or_default();
                merge_attributes(
                    profile,
                    &record.attributes,
                    &record.student_id,
                    SourceKind::Engagement(event_type),
                    &mut columns,
                    &mut stats,
                );
                events.entry(record.student_id).or_default().push(TimelineEvent {
                    event_type,
                    date: record.date,
                    subtype: record.subtype,
                });
            }
        }

        let students: Vec<StudentTimeline> = events
            .into_iter()
            .map(|(student_id, mut events)| {
                events.sort_by_key(|event| event.date);
                let attributes = profiles.remove(&student_id).unwrap_or_default();
                StudentTimeline {
                    student_id,
                    attributes,
                    events,
                }
            })
            .collect();

        stats.students = students.len();
        stats.events = students.iter().map(|student| student.events.len()).sum();
        info!(
            students = stats.students,
            events = stats.events,
            conflicts = stats.conflicts,
            "timeline built"
        );

        let timeline = Timeline {
            descriptive_columns: columns,
            students,
        };
        (timeline, stats)
    }
}

fn merge_attributes(
    profile: &mut Attributes,
    incoming: &Attributes,
    student_id: &str,
    source: SourceKind,
    columns: &mut Vec<String>,
    stats: &mut BuildStats,
) {
    for (field, value) in incoming {
        if !columns.contains(field) {
            columns.push(field.clone());
        }
        match profile.get(field) {
            None => {
                profile.insert(field.clone(), value.clone());
            }
            Some(existing) if existing != value => {
                stats.conflicts += 1;
                debug!(
                    student = student_id,
                    field = field.as_str(),
                    kept = existing.as_str(),
                    discarded = value.as_str(),
                    source = %source,
                    "conflicting descriptive value"
                );
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{Term, YearBucket};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(
        student_id: &str,
        event_type: EventType,
        day: NaiveDate,
        attributes: &[(&str, &str)],
    ) -> EngagementRecord {
        EngagementRecord {
            student_id: student_id.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            event_type,
            subtype: None,
            date: day,
        }
    }

    #[test]
    fn groups_by_student_and_orders_by_date() {
        let mut builder = TimelineBuilder::new(vec!["Email".to_string()]);
        builder.add_source(
            EventType::Logins,
            vec![
                record("S2", EventType::Logins, date(2023, 3, 1), &[]),
                record("S1", EventType::Logins, date(2023, 2, 1), &[]),
                record("S1", EventType::Logins, date(2023, 2, 1), &[]),
            ],
        );
        builder.add_source(
            EventType::Applications,
            vec![record("S1", EventType::Applications, date(2023, 1, 5), &[])],
        );

        let (timeline, stats) = builder.build();
        assert_eq!(stats.students, 2);
        assert_eq!(stats.events, 4);

        let ids: Vec<&str> = timeline.students.iter().map(|s| s.student_id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2"]);

        let s1: Vec<(EventType, NaiveDate)> = timeline.students[0]
            .events
            .iter()
            .map(|e| (e.event_type, e.date))
            .collect();
        assert_eq!(
            s1,
            vec![
                (EventType::Applications, date(2023, 1, 5)),
                (EventType::Logins, date(2023, 2, 1)),
                (EventType::Logins, date(2023, 2, 1)),
            ]
        );
    }

    #[test]
    fn same_day_events_follow_source_priority() {
        let mut builder = TimelineBuilder::default();
        // Added out of priority order on purpose.
        builder.add_source(
            EventType::Logins,
            vec![record("S1", EventType::Logins, date(2023, 5, 1), &[])],
        );
        builder.add_source(
            EventType::Appointments,
            vec![record("S1", EventType::Appointments, date(2023, 5, 1), &[])],
        );

        let (timeline, _) = builder.build();
        let types: Vec<EventType> = timeline.students[0].events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::Appointments, EventType::Logins]);
    }

    #[test]
    fn first_value_in_priority_order_wins_conflicts() {
        let mut builder = TimelineBuilder::new(vec!["college_major".to_string(), "Email".to_string()]);
        builder.add_source(
            EventType::Logins,
            vec![record(
                "S1",
                EventType::Logins,
                date(2023, 1, 1),
                &[("college_major", "History"), ("Email", "s1@example.edu")],
            )],
        );
        builder.add_source(
            EventType::Applications,
            vec![record(
                "S1",
                EventType::Applications,
                date(2023, 1, 2),
                &[("college_major", "Biology")],
            )],
        );
        builder.add_enrollment(vec![EnrollmentRecord {
            student_id: "S1".to_string(),
            term: Term::from_date(date(2023, 1, 1)),
            standing: YearBucket::Junior,
            attributes: [("college_major".to_string(), "Chemistry".to_string())]
                .into_iter()
                .collect(),
        }]);

        let (timeline, stats) = builder.build();
        let student = &timeline.students[0];
        assert_eq!(student.attributes["college_major"], "Chemistry");
        assert_eq!(student.attributes["Email"], "s1@example.edu");
        assert_eq!(stats.conflicts, 2);
        assert_eq!(timeline.descriptive_columns, vec!["college_major", "Email"]);
    }

    #[test]
    fn enrollment_only_students_have_no_timeline() {
        let mut builder = TimelineBuilder::default();
        builder.add_enrollment(vec![EnrollmentRecord {
            student_id: "S9".to_string(),
            term: Term::from_date(date(2023, 1, 1)),
            standing: YearBucket::Freshman,
            attributes: Attributes::new(),
        }]);
        let (timeline, stats) = builder.build();
        assert!(timeline.students.is_empty());
        assert_eq!(stats.students, 0);
    }
}

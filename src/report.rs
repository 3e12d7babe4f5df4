use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info};

use crate::aggregate::aggregate;
use crate::calendar::StandingCalendar;
use crate::config::{Anchors, Com1100Options, FdsOptions, InternshipRule};
use crate::melt::melt;
use crate::models::{AggregateRow, Attributes, EventType, MeltedRow, Table, Timeline, DATE_FORMAT};
use crate::window::{self, AnchorRule, PresentationBucket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReportKind {
    Timeline,
    Cldc,
    Com1100,
    Fds,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Timeline => "timeline",
            ReportKind::Cldc => "cldc",
            ReportKind::Com1100 => "com1100",
            ReportKind::Fds => "fds",
        }
    }

    /// Engagement source the report anchors on, beyond the counted sources.
    pub fn anchor_source(&self) -> Option<EventType> {
        match self {
            ReportKind::Timeline => None,
            ReportKind::Cldc => Some(EventType::Appointments),
            ReportKind::Com1100 => Some(EventType::Presentations),
            ReportKind::Fds => Some(EventType::Surveys),
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutput {
    pub kind: ReportKind,
    pub tables: Vec<Table>,
    /// Timeline students absent from every aggregate of the report.
    pub students_excluded: usize,
}

/// Everything a report driver reads. Drivers only compose window selection,
/// aggregation and melting.
pub struct ReportContext<'a> {
    pub timeline: &'a Timeline,
    pub event_types: &'a [EventType],
    pub calendar: &'a StandingCalendar,
    pub anchors: &'a Anchors,
    pub com1100: &'a Com1100Options,
    pub fds: &'a FdsOptions,
}

impl ReportContext<'_> {
    pub fn generate(&self, kind: ReportKind) -> ReportOutput {
        let output = match kind {
            ReportKind::Timeline => ReportOutput {
                kind,
                tables: vec![timeline_table("timeline", self.timeline)],
                students_excluded: 0,
            },
            ReportKind::Cldc => self.cldc(),
            ReportKind::Com1100 => self.com1100(),
            ReportKind::Fds => self.fds(),
        };
        info!(
            report = %kind,
            tables = output.tables.len(),
            excluded = output.students_excluded,
            "report generated"
        );
        output
    }

    fn cldc(&self) -> ReportOutput {
        let rule = AnchorRule {
            event_type: EventType::Appointments,
            tag: Some(self.anchors.cldc_tag.clone()),
        };
        let selection = window::select_cldc(self.timeline, &rule, self.event_types);
        debug!(windows = selection.windows.len(), "cldc windows selected");
        let rows = aggregate(&selection.timeline, self.event_types);
        let melted = melt(&rows, self.event_types, self.calendar);
        let columns = &self.timeline.descriptive_columns;

        ReportOutput {
            kind: ReportKind::Cldc,
            students_excluded: self.excluded(rows.len()),
            tables: vec![
                timeline_table("cldc_timeline", &selection.timeline),
                aggregate_table("cldc_agg", columns, &rows, self.event_types),
                melt_table("cldc_melt", columns, &melted),
            ],
        }
    }

    fn com1100(&self) -> ReportOutput {
        let rule = AnchorRule {
            event_type: EventType::Presentations,
            tag: self.anchors.presentation_tag.clone(),
        };
        let cohort: Option<HashSet<&str>> = self
            .com1100
            .no_presentation_standing
            .filter(|_| !self.calendar.is_empty())
            .map(|standing| {
                self.calendar
                    .students_with_standing(standing, self.com1100.cohort_from_term)
            });

        let buckets =
            window::partition_com1100(self.timeline, &rule, cohort.as_ref(), self.event_types);
        let columns = &self.timeline.descriptive_columns;

        let mut tables = Vec::with_capacity(PresentationBucket::ALL.len() * 2);
        let mut included = 0;
        for (bucket, selection) in &buckets {
            debug!(bucket = bucket.as_str(), windows = selection.windows.len(), "com1100 windows selected");
            let rows = aggregate(&selection.timeline, self.event_types);
            let melted = melt(&rows, self.event_types, self.calendar);
            included += rows.len();
            tables.push(aggregate_table(
                &format!("com1100_{}_agg", bucket.as_str()),
                columns,
                &rows,
                self.event_types,
            ));
            tables.push(melt_table(
                &format!("com1100_{}_melt", bucket.as_str()),
                columns,
                &melted,
            ));
        }

        ReportOutput {
            kind: ReportKind::Com1100,
            tables,
            students_excluded: self.excluded(included),
        }
    }

    fn fds(&self) -> ReportOutput {
        let selection = window::select_fds(self.timeline, self.event_types, &self.fds.require);
        debug!(windows = selection.windows.len(), "fds windows selected");
        let rows = aggregate(&selection.timeline, self.event_types);
        let melted = melt(&rows, self.event_types, self.calendar);
        let columns = &self.timeline.descriptive_columns;

        let mut agg = aggregate_table("fds_agg", columns, &rows, self.event_types);
        if let Some(rule) = &self.fds.internships {
            agg.headers.push("Internships".to_string());
            for (cells, row) in agg.rows.iter_mut().zip(&rows) {
                cells.push(internships(&row.attributes, rule));
            }
        }
        agg.headers.push("Outcome_Success".to_string());
        for (cells, row) in agg.rows.iter_mut().zip(&rows) {
            cells.push(outcome_success(row, self.fds));
        }

        ReportOutput {
            kind: ReportKind::Fds,
            students_excluded: self.excluded(rows.len()),
            tables: vec![agg, melt_table("fds_melt", columns, &melted)],
        }
    }

    fn excluded(&self, included: usize) -> usize {
        self.timeline.students.len().saturating_sub(included)
    }
}

/// `1` for a successful first destination, `0` otherwise, empty when the
/// outcome is missing or not in the configured mapping.
fn outcome_success(row: &AggregateRow, options: &FdsOptions) -> String {
    row.attributes
        .get(&options.outcome_attribute)
        .and_then(|outcome| options.outcomes.get(outcome.trim()))
        .map(|success| if *success { "1" } else { "0" })
        .unwrap_or_default()
        .to_string()
}

fn internships(attributes: &Attributes, rule: &InternshipRule) -> String {
    let count = attributes
        .get(&rule.count_attribute)
        .map(|value| value.trim())
        .unwrap_or_default();
    let has_employer = attributes
        .get(&rule.employer_attribute)
        .map(|value| value.trim())
        .is_some_and(|value| !value.is_empty() && value != "NA");
    if count == "0" && has_employer {
        "1".to_string()
    } else {
        count.to_string()
    }
}

fn descriptive_cells(attributes: &Attributes, columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .map(|column| attributes.get(column).cloned().unwrap_or_default())
        .collect()
}

fn headers(columns: &[String], trailing: impl IntoIterator<Item = String>) -> Vec<String> {
    std::iter::once("Student_ID".to_string())
        .chain(columns.iter().cloned())
        .chain(trailing)
        .collect()
}

pub fn timeline_table(name: &str, timeline: &Timeline) -> Table {
    let columns = &timeline.descriptive_columns;
    let mut table = Table::new(
        name,
        headers(columns, ["Event_Type".to_string(), "Date".to_string()]),
    );

    for student in &timeline.students {
        let descriptive = descriptive_cells(&student.attributes, columns);
        for event in &student.events {
            let mut row = Vec::with_capacity(table.headers.len());
            row.push(student.student_id.clone());
            row.extend(descriptive.iter().cloned());
            row.push(event.event_type.to_string());
            row.push(event.date.format(DATE_FORMAT).to_string());
            table.rows.push(row);
        }
    }

    table
}

pub fn aggregate_table(
    name: &str,
    columns: &[String],
    rows: &[AggregateRow],
    event_types: &[EventType],
) -> Table {
    let totals = event_types
        .iter()
        .map(|event_type| format!("Total_{event_type}"));
    let mut table = Table::new(name, headers(columns, totals));

    for row in rows {
        let mut cells = Vec::with_capacity(table.headers.len());
        cells.push(row.student_id.clone());
        cells.extend(descriptive_cells(&row.attributes, columns));
        cells.extend(
            event_types
                .iter()
                .map(|event_type| row.count(*event_type).to_string()),
        );
        table.rows.push(cells);
    }

    table
}

pub fn melt_table(name: &str, columns: &[String], melted: &[MeltedRow]) -> Table {
    let trailing = ["Event_Type", "Count", "Year_Bucket"].map(str::to_string);
    let mut table = Table::new(name, headers(columns, trailing));

    for row in melted {
        let mut cells = Vec::with_capacity(table.headers.len());
        cells.push(row.student_id.clone());
        cells.extend(descriptive_cells(&row.attributes, columns));
        cells.push(row.event_type.to_string());
        cells.push(row.count.to_string());
        cells.push(row.year_bucket.to_string());
        table.rows.push(cells);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{Term, YearBucket};
    use crate::models::{EngagementRecord, EnrollmentRecord};
    use crate::timeline::TimelineBuilder;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(
        student_id: &str,
        event_type: EventType,
        day: NaiveDate,
        subtype: Option<&str>,
        attributes: &[(&str, &str)],
    ) -> EngagementRecord {
        EngagementRecord {
            student_id: student_id.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            event_type,
            subtype: subtype.map(str::to_string),
            date: day,
        }
    }

    fn build(records: Vec<EngagementRecord>, columns: &[&str]) -> Timeline {
        let mut builder = TimelineBuilder::new(columns.iter().map(|c| c.to_string()).collect());
        for record in records {
            let event_type = record.event_type;
            builder.add_source(event_type, vec![record]);
        }
        builder.build().0
    }

    fn generate(timeline: &Timeline, calendar: &StandingCalendar, kind: ReportKind) -> ReportOutput {
        let ctx = ReportContext {
            timeline,
            event_types: &EventType::COUNTED,
            calendar,
            anchors: &Anchors::default(),
            com1100: &Com1100Options::default(),
            fds: &FdsOptions::default(),
        };
        ctx.generate(kind)
    }

    fn table<'a>(output: &'a ReportOutput, name: &str) -> &'a Table {
        output
            .tables
            .iter()
            .find(|table| table.name == name)
            .unwrap_or_else(|| panic!("missing table {name}"))
    }

    #[test]
    fn worked_cldc_example() {
        let timeline = build(
            vec![
                record("S1", EventType::Appointments, date(2023, 1, 1), Some("CLDC"), &[]),
                record("S1", EventType::Logins, date(2023, 1, 2), None, &[]),
                record("S1", EventType::Logins, date(2023, 1, 15), None, &[]),
            ],
            &["Email"],
        );
        let output = generate(&timeline, &StandingCalendar::default(), ReportKind::Cldc);

        let agg = table(&output, "cldc_agg");
        assert_eq!(
            agg.headers,
            vec![
                "Student_ID",
                "Email",
                "Total_Applications",
                "Total_Appointments",
                "Total_Career_Fairs",
                "Total_Events",
                "Total_Logins",
            ]
        );
        assert_eq!(agg.rows, vec![vec!["S1", "", "0", "1", "0", "0", "2"]]);

        let tl = table(&output, "cldc_timeline");
        let dates: Vec<&str> = tl.rows.iter().map(|row| row[3].as_str()).collect();
        assert_eq!(dates, vec!["20230101", "20230102", "20230115"]);

        let melt = table(&output, "cldc_melt");
        assert_eq!(
            melt.rows,
            vec![
                vec!["S1", "", "Appointments", "1", "Unclassified"],
                vec!["S1", "", "Logins", "2", "Unclassified"],
            ]
        );
    }

    #[test]
    fn timeline_report_lists_every_event() {
        let timeline = build(
            vec![
                record("S2", EventType::Events, date(2023, 3, 1), None, &[("Email", "b@x.edu")]),
                record("S1", EventType::Logins, date(2023, 2, 1), None, &[("Email", "a@x.edu")]),
                record("S1", EventType::Logins, date(2023, 2, 1), None, &[]),
            ],
            &["Email"],
        );
        let output = generate(&timeline, &StandingCalendar::default(), ReportKind::Timeline);
        assert_eq!(
            output.tables[0].rows,
            vec![
                vec!["S1", "a@x.edu", "Logins", "20230201"],
                vec!["S1", "a@x.edu", "Logins", "20230201"],
                vec!["S2", "b@x.edu", "Events", "20230301"],
            ]
        );
    }

    #[test]
    fn com1100_emits_six_tables_with_exclusive_membership() {
        let timeline = build(
            vec![
                record("S0", EventType::Logins, date(2022, 9, 1), None, &[]),
                record("S1", EventType::Presentations, date(2022, 9, 5), None, &[]),
                record("S1", EventType::Logins, date(2022, 9, 8), None, &[]),
                record("S2", EventType::Presentations, date(2022, 9, 5), None, &[]),
                record("S2", EventType::Presentations, date(2022, 10, 5), None, &[]),
                record("S2", EventType::Events, date(2022, 10, 9), None, &[]),
            ],
            &[],
        );
        let output = generate(&timeline, &StandingCalendar::default(), ReportKind::Com1100);

        let names: Vec<&str> = output.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "com1100_none_agg",
                "com1100_none_melt",
                "com1100_single_agg",
                "com1100_single_melt",
                "com1100_multiple_agg",
                "com1100_multiple_melt",
            ]
        );

        let members = |name: &str| -> Vec<String> {
            table(&output, name).rows.iter().map(|row| row[0].clone()).collect()
        };
        assert_eq!(members("com1100_none_agg"), vec!["S0"]);
        assert_eq!(members("com1100_single_agg"), vec!["S1"]);
        assert_eq!(members("com1100_multiple_agg"), vec!["S2"]);
        assert_eq!(output.students_excluded, 0);
    }

    #[test]
    fn com1100_no_presentation_cohort_uses_enrollment() {
        let enrollment = vec![EnrollmentRecord {
            student_id: "S0".to_string(),
            term: Term::from_date(date(2022, 9, 1)),
            standing: YearBucket::Freshman,
            attributes: Default::default(),
        }];
        let calendar = StandingCalendar::new(&enrollment, None);
        let timeline = build(
            vec![
                record("S0", EventType::Logins, date(2022, 9, 1), None, &[]),
                record("S3", EventType::Logins, date(2022, 9, 1), None, &[]),
            ],
            &[],
        );
        let output = generate(&timeline, &calendar, ReportKind::Com1100);

        let none = table(&output, "com1100_none_agg");
        assert_eq!(none.rows.len(), 1);
        assert_eq!(none.rows[0][0], "S0");
        assert_eq!(output.students_excluded, 1);

        let melt = table(&output, "com1100_none_melt");
        assert_eq!(melt.rows, vec![vec!["S0", "Logins", "1", "Freshman"]]);
    }

    #[test]
    fn fds_excludes_students_without_prior_engagement() {
        let outcome = [("outcome", "Employed Full-Time")];
        let timeline = build(
            vec![
                record("S1", EventType::Events, date(2023, 1, 10), None, &[]),
                record("S1", EventType::Surveys, date(2023, 6, 1), None, &outcome),
                record("S2", EventType::Surveys, date(2023, 6, 1), None, &[("outcome", "Seeking Employment")]),
                record("S2", EventType::Logins, date(2023, 7, 1), None, &[]),
                record("S3", EventType::Logins, date(2023, 1, 1), None, &[]),
            ],
            &["outcome"],
        );
        let output = generate(&timeline, &StandingCalendar::default(), ReportKind::Fds);

        let agg = table(&output, "fds_agg");
        assert_eq!(agg.headers.last().map(String::as_str), Some("Outcome_Success"));
        assert_eq!(
            agg.rows,
            vec![vec!["S1", "Employed Full-Time", "0", "0", "0", "1", "0", "1"]]
        );
        assert_eq!(output.students_excluded, 2);
    }

    #[test]
    fn fds_derives_internships_from_the_employer() {
        let surveyed = |id: &str, count: &str, employer: &str| {
            vec![
                record(id, EventType::Logins, date(2023, 1, 10), None, &[]),
                record(
                    id,
                    EventType::Surveys,
                    date(2023, 6, 1),
                    None,
                    &[("outcome", "Employed Full-Time"), ("internships", count), ("internship_emp", employer)],
                ),
            ]
        };
        let timeline = build(
            [
                surveyed("S1", "0", "Acme Corp"),
                surveyed("S2", "0", "NA"),
                surveyed("S3", "2", ""),
            ]
            .concat(),
            &["outcome", "internships", "internship_emp"],
        );
        let fds = FdsOptions {
            internships: Some(InternshipRule {
                count_attribute: "internships".to_string(),
                employer_attribute: "internship_emp".to_string(),
            }),
            ..FdsOptions::default()
        };
        let ctx = ReportContext {
            timeline: &timeline,
            event_types: &EventType::COUNTED,
            calendar: &StandingCalendar::default(),
            anchors: &Anchors::default(),
            com1100: &Com1100Options::default(),
            fds: &fds,
        };
        let output = ctx.generate(ReportKind::Fds);

        let agg = table(&output, "fds_agg");
        let width = agg.headers.len();
        assert_eq!(agg.headers[width - 2..], ["Internships", "Outcome_Success"]);
        let derived: Vec<(&str, &str)> = agg
            .rows
            .iter()
            .map(|row| (row[0].as_str(), row[width - 2].as_str()))
            .collect();
        assert_eq!(derived, vec![("S1", "1"), ("S2", "0"), ("S3", "2")]);
    }

    #[test]
    fn empty_timeline_yields_empty_tables() {
        let timeline = Timeline::default();
        for kind in [ReportKind::Timeline, ReportKind::Cldc, ReportKind::Com1100, ReportKind::Fds] {
            let output = generate(&timeline, &StandingCalendar::default(), kind);
            assert!(!output.tables.is_empty());
            assert!(output.tables.iter().all(|table| table.rows.is_empty()));
            assert!(output.tables.iter().all(|table| table.headers[0] == "Student_ID"));
        }
    }

    #[test]
    fn generating_twice_is_identical() {
        let records = vec![
            record("S2", EventType::Appointments, date(2023, 2, 1), Some("CLDC"), &[]),
            record("S1", EventType::Appointments, date(2023, 2, 1), Some("CLDC"), &[]),
            record("S1", EventType::Events, date(2023, 2, 1), None, &[]),
            record("S2", EventType::Surveys, date(2024, 5, 1), None, &[]),
            record("S1", EventType::Presentations, date(2022, 9, 1), None, &[]),
        ];
        let first = build(records.clone(), &[]);
        let second = build(records, &[]);
        let calendar = StandingCalendar::default();
        for kind in [ReportKind::Timeline, ReportKind::Cldc, ReportKind::Com1100, ReportKind::Fds] {
            assert_eq!(
                generate(&first, &calendar, kind),
                generate(&second, &calendar, kind)
            );
        }
    }
}

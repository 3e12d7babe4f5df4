use chrono::{DateTime, NaiveDate};
use tracing::{debug, instrument, warn};

use crate::calendar::{Term, YearBucket};
use crate::config::{DateRange, EnrollmentMapping, SourceMapping};
use crate::error::Result;
use crate::io::RawTable;
use crate::models::{Attributes, EngagementRecord, EnrollmentRecord, EventType};

/// Per-source row accounting. `malformed` rows lacked an identifier or a
/// parseable date; `filtered` rows failed a `require` rule or carried an
/// unusable term; `out_of_range` rows fell outside the run's date range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub rows: usize,
    pub kept: usize,
    pub malformed: usize,
    pub filtered: usize,
    pub out_of_range: usize,
}

impl NormalizeStats {
    pub fn skipped(&self) -> usize {
        self.malformed + self.filtered + self.out_of_range
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    pub stats: NormalizeStats,
}

/// Converts one engagement export into [`EngagementRecord`]s.
///
/// Fails only when the mapping references a column the export does not
/// have; bad rows are skipped and counted.
#[instrument(level = "debug", skip_all, fields(source = %event_type))]
pub fn normalize_source(
    event_type: EventType,
    mapping: &SourceMapping,
    table: &RawTable,
    range: &DateRange,
) -> Result<Normalized<EngagementRecord>> {
    let resolved = mapping.resolve(event_type, &table.headers)?;
    let mut stats = NormalizeStats::default();
    let mut records = Vec::with_capacity(table.rows.len());

    for (index, row) in table.rows.iter().enumerate() {
        stats.rows += 1;

        let required = resolved
            .require
            .iter()
            .all(|(column, value)| cell(row, *column).eq_ignore_ascii_case(value.trim()));
        if !required {
            stats.filtered += 1;
            continue;
        }

        let student_id = cell(row, resolved.student_id);
        if student_id.is_empty() {
            stats.malformed += 1;
            debug!(row = index + 1, "missing student identifier");
            continue;
        }

        let raw_date = cell(row, resolved.date);
        let Some(date) = parse_date(raw_date, &resolved.date_formats) else {
            stats.malformed += 1;
            debug!(row = index + 1, value = raw_date, "unparseable date");
            continue;
        };

        if !range.contains(date) {
            stats.out_of_range += 1;
            continue;
        }

        let subtype = resolved
            .subtype
            .map(|column| cell(row, column))
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        records.push(EngagementRecord {
            student_id: student_id.to_string(),
            attributes: collect_attributes(row, &resolved.descriptive),
            event_type,
            subtype,
            date,
        });
        stats.kept += 1;
    }

    if stats.malformed > 0 {
        warn!(
            source = %event_type,
            malformed = stats.malformed,
            "skipped rows without an identifier or a parseable date"
        );
    }

    Ok(Normalized { records, stats })
}

/// Converts the registrar export into per-term standings. Rows whose term
/// code or standing is outside the academic calendar are filtered.
#[instrument(level = "debug", skip_all)]
pub fn normalize_enrollment(
    mapping: &EnrollmentMapping,
    table: &RawTable,
) -> Result<Normalized<EnrollmentRecord>> {
    let resolved = mapping.resolve(&table.headers)?;
    let mut stats = NormalizeStats::default();
    let mut records = Vec::with_capacity(table.rows.len());

    for row in &table.rows {
        stats.rows += 1;

        let student_id = cell(row, resolved.student_id);
        if student_id.is_empty() {
            stats.malformed += 1;
            continue;
        }

        let term = Term::parse_code(cell(row, resolved.term));
        let standing = YearBucket::parse(cell(row, resolved.standing));
        let (Some(term), Some(standing)) = (term, standing) else {
            stats.filtered += 1;
            continue;
        };

        records.push(EnrollmentRecord {
            student_id: student_id.to_string(),
            term,
            standing,
            attributes: collect_attributes(row, &resolved.descriptive),
        });
        stats.kept += 1;
    }

    Ok(Normalized { records, stats })
}

/// Parses `value` with the first matching format. Formats may match a prefix
/// of the value as long as what follows is a time-of-day part.
pub fn parse_date(value: &str, formats: &[String]) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    for format in formats {
        if let Ok((date, rest)) = NaiveDate::parse_and_remainder(value, format) {
            if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == 'T' || c == ',') {
                return Some(date);
            }
        }
    }

    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.date_naive())
        .ok()
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(|value| value.trim()).unwrap_or("")
}

fn collect_attributes(row: &[String], fields: &[(String, usize)]) -> Attributes {
    fields
        .iter()
        .filter_map(|(field, index)| {
            let value = cell(row, *index);
            (!value.is_empty()).then(|| (field.clone(), value.to_string()))
        })
        .collect()
}

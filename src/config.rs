use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::calendar::{Term, YearBucket};
use crate::error::{EngineError, Result};
use crate::models::{EventType, SourceKind};

/// Run configuration, loaded once from JSON and validated before any source
/// is read.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub date_range: DateRange,
    #[serde(default = "default_event_types")]
    pub event_types: Vec<EventType>,
    pub sources: BTreeMap<EventType, SourceMapping>,
    #[serde(default)]
    pub enrollment: Option<EnrollmentMapping>,
    #[serde(default)]
    pub anchors: Anchors,
    #[serde(default)]
    pub year_buckets: YearBucketRule,
    #[serde(default)]
    pub com1100: Com1100Options,
    #[serde(default)]
    pub fds: FdsOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateRange {
    #[serde(default = "default_start")]
    pub start: NaiveDate,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

impl Default for DateRange {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: None,
        }
    }
}

impl DateRange {
    /// Both bounds are inclusive; a missing end means "present".
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && self.end.map_or(true, |end| date <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMapping {
    pub field: String,
    pub column: String,
}

/// Column mapping for one engagement export.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceMapping {
    pub path: PathBuf,
    pub student_id: String,
    pub date: String,
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
    #[serde(default)]
    pub descriptive: Vec<FieldMapping>,
    #[serde(default)]
    pub subtype: Option<String>,
    /// Column → value pairs a row must carry to be kept.
    #[serde(default)]
    pub require: BTreeMap<String, String>,
}

/// Column indexes of a [`SourceMapping`] resolved against an actual header row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub student_id: usize,
    pub date: usize,
    pub subtype: Option<usize>,
    pub descriptive: Vec<(String, usize)>,
    pub require: Vec<(usize, String)>,
    pub date_formats: Vec<String>,
}

impl SourceMapping {
    pub fn resolve(&self, event_type: EventType, headers: &[String]) -> Result<ResolvedSource> {
        let kind = SourceKind::Engagement(event_type);
        Ok(ResolvedSource {
            student_id: column_index(kind, headers, &self.student_id)?,
            date: column_index(kind, headers, &self.date)?,
            subtype: self
                .subtype
                .as_deref()
                .map(|column| column_index(kind, headers, column))
                .transpose()?,
            descriptive: resolve_fields(kind, headers, &self.descriptive)?,
            require: self
                .require
                .iter()
                .map(|(column, value)| Ok((column_index(kind, headers, column)?, value.clone())))
                .collect::<Result<_>>()?,
            date_formats: self.date_formats.clone(),
        })
    }
}

/// Column mapping for the registrar's per-term enrollment export.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrollmentMapping {
    pub path: PathBuf,
    pub student_id: String,
    pub term: String,
    pub standing: String,
    #[serde(default)]
    pub descriptive: Vec<FieldMapping>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEnrollment {
    pub student_id: usize,
    pub term: usize,
    pub standing: usize,
    pub descriptive: Vec<(String, usize)>,
}

impl EnrollmentMapping {
    pub fn resolve(&self, headers: &[String]) -> Result<ResolvedEnrollment> {
        let kind = SourceKind::Enrollment;
        Ok(ResolvedEnrollment {
            student_id: column_index(kind, headers, &self.student_id)?,
            term: column_index(kind, headers, &self.term)?,
            standing: column_index(kind, headers, &self.standing)?,
            descriptive: resolve_fields(kind, headers, &self.descriptive)?,
        })
    }
}

/// Subtype tags distinguishing anchor records from the rest of their category.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Anchors {
    #[serde(default = "default_cldc_tag")]
    pub cldc_tag: String,
    /// When unset every Presentations record counts as a COM1100 presentation.
    #[serde(default)]
    pub presentation_tag: Option<String>,
}

impl Default for Anchors {
    fn default() -> Self {
        Self {
            cldc_tag: default_cldc_tag(),
            presentation_tag: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YearBucketRule {
    /// Descriptive attribute consulted when enrollment has no row for a term.
    #[serde(default)]
    pub standing_attribute: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Com1100Options {
    /// Standing that defines the comparison cohort of students without a
    /// presentation. Only applied when enrollment data is loaded.
    #[serde(default = "default_cohort_standing")]
    pub no_presentation_standing: Option<YearBucket>,
    /// Earliest enrollment term (`YYYYSS`) counted towards that cohort.
    #[serde(default)]
    pub cohort_from_term: Option<Term>,
}

impl Default for Com1100Options {
    fn default() -> Self {
        Self {
            no_presentation_standing: default_cohort_standing(),
            cohort_from_term: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FdsOptions {
    #[serde(default = "default_outcome_attribute")]
    pub outcome_attribute: String,
    /// Survey outcome → whether it counts as a successful first destination.
    #[serde(default = "default_outcomes")]
    pub outcomes: BTreeMap<String, bool>,
    /// Attribute → value pairs a surveyed student must carry.
    #[serde(default)]
    pub require: BTreeMap<String, String>,
    /// Adds a derived `Internships` column to the FDS aggregate when set.
    #[serde(default)]
    pub internships: Option<InternshipRule>,
}

impl Default for FdsOptions {
    fn default() -> Self {
        Self {
            outcome_attribute: default_outcome_attribute(),
            outcomes: default_outcomes(),
            require: BTreeMap::new(),
            internships: None,
        }
    }
}

/// A reported internship count of `0` becomes `1` when the survey names an
/// internship employer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InternshipRule {
    #[serde(default = "default_internship_count")]
    pub count_attribute: String,
    #[serde(default = "default_internship_employer")]
    pub employer_attribute: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_types.is_empty() {
            return Err(EngineError::InvalidConfig(
                "event_types must list at least one event type".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for event_type in &self.event_types {
            if !seen.insert(event_type) {
                return Err(EngineError::InvalidConfig(format!(
                    "event type {event_type} is listed twice"
                )));
            }
            if !self.sources.contains_key(event_type) {
                return Err(EngineError::InvalidConfig(format!(
                    "event type {event_type} is counted but has no configured source"
                )));
            }
        }
        if let Some(end) = self.date_range.end {
            if end < self.date_range.start {
                return Err(EngineError::InvalidConfig(format!(
                    "date range ends ({end}) before it starts ({})",
                    self.date_range.start
                )));
            }
        }
        for (event_type, mapping) in &self.sources {
            if mapping.date_formats.is_empty() {
                return Err(EngineError::InvalidConfig(format!(
                    "{event_type} source declares no date formats"
                )));
            }
        }
        self.validate_references()
    }

    /// Attribute and subtype names used by the reports must be produced by
    /// some configured mapping.
    fn validate_references(&self) -> Result<()> {
        let columns = self.descriptive_columns();
        let known = |field: &str| columns.iter().any(|column| column == field);

        if let Some(field) = &self.year_buckets.standing_attribute {
            if !known(field.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "year_buckets.standing_attribute {field:?} is not a descriptive field"
                )));
            }
        }

        if self
            .sources
            .get(&EventType::Appointments)
            .is_some_and(|mapping| mapping.subtype.is_none())
        {
            return Err(EngineError::InvalidConfig(format!(
                "anchors.cldc_tag {:?} needs a subtype column on the Appointments source",
                self.anchors.cldc_tag
            )));
        }

        if let Some(tag) = &self.anchors.presentation_tag {
            let has_subtype = self
                .sources
                .get(&EventType::Presentations)
                .is_some_and(|mapping| mapping.subtype.is_some());
            if !has_subtype {
                return Err(EngineError::InvalidConfig(format!(
                    "anchors.presentation_tag {tag:?} needs a Presentations source with a subtype column"
                )));
            }
        }

        if self.sources.contains_key(&EventType::Surveys) {
            if !known(self.fds.outcome_attribute.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "fds.outcome_attribute {:?} is not a descriptive field",
                    self.fds.outcome_attribute
                )));
            }
            if let Some(field) = self.fds.require.keys().find(|field| !known(field.as_str())) {
                return Err(EngineError::InvalidConfig(format!(
                    "fds.require names {field:?}, which is not a descriptive field"
                )));
            }
            if let Some(rule) = &self.fds.internships {
                for field in [&rule.count_attribute, &rule.employer_attribute] {
                    if !known(field.as_str()) {
                        return Err(EngineError::InvalidConfig(format!(
                            "fds.internships names {field:?}, which is not a descriptive field"
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Descriptive field names in source-priority order, first occurrence wins.
    pub fn descriptive_columns(&self) -> Vec<String> {
        let enrollment = self
            .enrollment
            .iter()
            .flat_map(|mapping| mapping.descriptive.iter());
        let sources = self
            .sources
            .values()
            .flat_map(|mapping| mapping.descriptive.iter());

        let mut columns: Vec<String> = Vec::new();
        for mapping in enrollment.chain(sources) {
            if !columns.contains(&mapping.field) {
                columns.push(mapping.field.clone());
            }
        }
        columns
    }
}

fn column_index(kind: SourceKind, headers: &[String], column: &str) -> Result<usize> {
    headers
        .iter()
        .position(|header| header.trim_start_matches('\u{feff}').trim() == column.trim())
        .ok_or_else(|| EngineError::SchemaMismatch {
            source_kind: kind,
            column: column.to_string(),
        })
}

fn resolve_fields(
    kind: SourceKind,
    headers: &[String],
    fields: &[FieldMapping],
) -> Result<Vec<(String, usize)>> {
    fields
        .iter()
        .map(|mapping| Ok((mapping.field.clone(), column_index(kind, headers, &mapping.column)?)))
        .collect()
}

fn default_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default()
}

fn default_event_types() -> Vec<EventType> {
    EventType::COUNTED.to_vec()
}

pub fn default_date_formats() -> Vec<String> {
    [
        "%Y-%m-%d",
        "%Y%m%d",
        "%m/%d/%y",
        "%m/%d/%Y",
        "%a %b %d %Y",
        "%b %d %Y",
        "%d-%b-%Y",
    ]
    .iter()
    .map(|format| format.to_string())
    .collect()
}

fn default_cldc_tag() -> String {
    "CLDC".to_string()
}

fn default_cohort_standing() -> Option<YearBucket> {
    Some(YearBucket::Freshman)
}

fn default_outcome_attribute() -> String {
    "outcome".to_string()
}

fn default_internship_count() -> String {
    "internships".to_string()
}

fn default_internship_employer() -> String {
    "internship_emp".to_string()
}

fn default_outcomes() -> BTreeMap<String, bool> {
    [
        ("Employed (Unknown Hours Worked)", true),
        ("Employed Full-Time", true),
        ("Employed Part-Time", true),
        ("Not Seeking Employment", false),
        ("Pursuing Continuing Education", true),
        ("Seeking Employment", false),
        ("Serving in the Military", true),
        ("Volunteer or Service Program", true),
    ]
    .into_iter()
    .map(|(outcome, success)| (outcome.to_string(), success))
    .collect()
}

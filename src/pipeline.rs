use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{error, info, instrument, warn};

use crate::calendar::StandingCalendar;
use crate::config::Config;
use crate::error::Result;
use crate::io;
use crate::models::{EngagementRecord, EnrollmentRecord, EventType, SourceKind, Table, Timeline};
use crate::normalize::{self, NormalizeStats, Normalized};
use crate::report::{ReportContext, ReportKind};
use crate::timeline::{BuildStats, TimelineBuilder};

/// Outcome of loading every configured source. A failed source only blocks
/// the reports that depend on it.
#[derive(Debug, Default)]
pub struct LoadedSources {
    pub engagement: BTreeMap<EventType, Normalized<EngagementRecord>>,
    pub enrollment: Option<Normalized<EnrollmentRecord>>,
    pub failures: BTreeMap<SourceKind, String>,
}

impl LoadedSources {
    pub fn stats(&self, kind: SourceKind) -> Option<NormalizeStats> {
        match kind {
            SourceKind::Enrollment => self.enrollment.as_ref().map(|loaded| loaded.stats),
            SourceKind::Engagement(event_type) => {
                self.engagement.get(&event_type).map(|loaded| loaded.stats)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportStatus {
    Written(Vec<PathBuf>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSummary {
    pub kind: ReportKind,
    pub rows_skipped: usize,
    pub students_excluded: usize,
    pub status: ReportStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub reports: Vec<ReportSummary>,
    pub descriptive_conflicts: usize,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.reports
            .iter()
            .all(|report| matches!(report.status, ReportStatus::Written(_)))
    }
}

/// Sources a report cannot be produced without.
pub fn required_sources(config: &Config, kind: ReportKind) -> BTreeSet<SourceKind> {
    let mut sources: BTreeSet<SourceKind> = config
        .event_types
        .iter()
        .map(|event_type| SourceKind::Engagement(*event_type))
        .collect();
    if let Some(anchor) = kind.anchor_source() {
        sources.insert(SourceKind::Engagement(anchor));
    }
    if config.enrollment.is_some() {
        sources.insert(SourceKind::Enrollment);
    }
    sources
}

#[instrument(level = "info", skip_all)]
pub fn load_sources(config: &Config) -> LoadedSources {
    let mut loaded = LoadedSources::default();

    if let Some(mapping) = &config.enrollment {
        let result = io::resolve_source_path(SourceKind::Enrollment, &mapping.path)
            .and_then(|path| io::read_table(&path))
            .and_then(|table| normalize::normalize_enrollment(mapping, &table));
        match result {
            Ok(normalized) => {
                info!(source = "Enrollment", kept = normalized.stats.kept, "loaded source");
                loaded.enrollment = Some(normalized);
            }
            Err(err) => {
                error!(source = "Enrollment", error = %err, "failed to load source");
                loaded.failures.insert(SourceKind::Enrollment, err.to_string());
            }
        }
    }

    for (event_type, mapping) in &config.sources {
        let kind = SourceKind::Engagement(*event_type);
        let result = io::resolve_source_path(kind, &mapping.path)
            .and_then(|path| io::read_table(&path))
            .and_then(|table| {
                normalize::normalize_source(*event_type, mapping, &table, &config.date_range)
            });
        match result {
            Ok(normalized) => {
                info!(
                    source = %event_type,
                    rows = normalized.stats.rows,
                    kept = normalized.stats.kept,
                    skipped = normalized.stats.skipped(),
                    "loaded source"
                );
                loaded.engagement.insert(*event_type, normalized);
            }
            Err(err) => {
                error!(source = %event_type, error = %err, "failed to load source");
                loaded.failures.insert(kind, err.to_string());
            }
        }
    }

    loaded
}

/// Loads every source, builds the timeline once and produces each requested
/// report, writing its tables under `out_dir`.
#[instrument(level = "info", skip_all, fields(out = %out_dir.display()))]
pub fn run(config: &Config, reports: &[ReportKind], out_dir: &Path) -> RunSummary {
    let mut loaded = load_sources(config);
    let (timeline, calendar, build_stats) = build_timeline(config, &mut loaded);

    let context = ReportContext {
        timeline: &timeline,
        event_types: &config.event_types,
        calendar: &calendar,
        anchors: &config.anchors,
        com1100: &config.com1100,
        fds: &config.fds,
    };

    let mut summary = RunSummary {
        reports: Vec::with_capacity(reports.len()),
        descriptive_conflicts: build_stats.conflicts,
    };

    for kind in reports {
        let required = required_sources(config, *kind);
        let rows_skipped = required
            .iter()
            .filter_map(|source| loaded.stats(*source))
            .map(|stats| stats.skipped())
            .sum();

        let blocked: Vec<String> = required
            .iter()
            .filter_map(|source| {
                if let Some(reason) = loaded.failures.get(source) {
                    Some(reason.clone())
                } else if loaded.stats(*source).is_none() {
                    Some(format!("{source} source is not configured"))
                } else {
                    None
                }
            })
            .collect();

        if !blocked.is_empty() {
            warn!(report = %kind, "report skipped because a required source is unavailable");
            summary.reports.push(ReportSummary {
                kind: *kind,
                rows_skipped,
                students_excluded: 0,
                status: ReportStatus::Failed(blocked.join("; ")),
            });
            continue;
        }

        let output = context.generate(*kind);
        let status = match write_tables(out_dir, &output.tables) {
            Ok(paths) => ReportStatus::Written(paths),
            Err(err) => {
                error!(report = %kind, error = %err, "failed to write report");
                ReportStatus::Failed(err.to_string())
            }
        };
        summary.reports.push(ReportSummary {
            kind: *kind,
            rows_skipped,
            students_excluded: output.students_excluded,
            status,
        });
    }

    summary
}

/// Hands the loaded records over to the timeline builder. Only the per-source
/// stats stay behind in `loaded`.
pub fn build_timeline(
    config: &Config,
    loaded: &mut LoadedSources,
) -> (Timeline, StandingCalendar, BuildStats) {
    let mut builder = TimelineBuilder::new(config.descriptive_columns());
    let enrollment = loaded
        .enrollment
        .as_mut()
        .map(|normalized| std::mem::take(&mut normalized.records))
        .unwrap_or_default();
    let calendar = StandingCalendar::new(&enrollment, config.year_buckets.standing_attribute.clone());
    builder.add_enrollment(enrollment);
    for (event_type, normalized) in loaded.engagement.iter_mut() {
        builder.add_source(*event_type, std::mem::take(&mut normalized.records));
    }
    let (timeline, stats) = builder.build();
    (timeline, calendar, stats)
}

/// Resolves every configured source and checks its header row against the
/// mapping, without normalizing rows or writing anything.
pub fn check_sources(config: &Config) -> Vec<(SourceKind, Result<PathBuf>)> {
    let mut checks = Vec::new();

    if let Some(mapping) = &config.enrollment {
        let kind = SourceKind::Enrollment;
        let result = io::resolve_source_path(kind, &mapping.path).and_then(|path| {
            let table = io::read_table(&path)?;
            mapping.resolve(&table.headers)?;
            Ok(path)
        });
        checks.push((kind, result));
    }

    for (event_type, mapping) in &config.sources {
        let kind = SourceKind::Engagement(*event_type);
        let result = io::resolve_source_path(kind, &mapping.path).and_then(|path| {
            let table = io::read_table(&path)?;
            mapping.resolve(*event_type, &table.headers)?;
            Ok(path)
        });
        checks.push((kind, result));
    }

    checks
}

fn write_tables(out_dir: &Path, tables: &[Table]) -> Result<Vec<PathBuf>> {
    tables
        .iter()
        .map(|table| io::write_table(out_dir, table))
        .collect()
}

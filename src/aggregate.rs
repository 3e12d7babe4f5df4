use std::collections::BTreeMap;

use crate::calendar::Term;
use crate::models::{AggregateRow, EventType, Timeline};

/// Collapses a (windowed) timeline into one row per student.
///
/// Every type in `event_types` gets a count, zero included. Students with no
/// event of those types produce no row at all.
pub fn aggregate(timeline: &Timeline, event_types: &[EventType]) -> Vec<AggregateRow> {
    let mut rows = Vec::new();

    for student in &timeline.students {
        let mut counts: BTreeMap<EventType, u32> =
            event_types.iter().map(|event_type| (*event_type, 0)).collect();
        let mut term_counts: BTreeMap<(EventType, Term), u32> = BTreeMap::new();

        for event in &student.events {
            let Some(count) = counts.get_mut(&event.event_type) else {
                continue;
            };
            *count += 1;
            *term_counts
                .entry((event.event_type, Term::from_date(event.date)))
                .or_insert(0) += 1;
        }

        let row = AggregateRow {
            student_id: student.student_id.clone(),
            attributes: student.attributes.clone(),
            counts,
            term_counts,
        };
        if row.total() == 0 {
            continue;
        }
        rows.push(row);
    }

    rows
}

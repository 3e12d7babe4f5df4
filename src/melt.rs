use std::collections::BTreeMap;

use crate::calendar::{YearBucket, YearClassifier};
use crate::models::{AggregateRow, EventType, MeltedRow};

/// Reshapes aggregate rows into one row per non-zero
/// (student, event type, year bucket).
///
/// Output follows the input student order, then the order of `event_types`,
/// then year bucket order.
pub fn melt<C>(rows: &[AggregateRow], event_types: &[EventType], classifier: &C) -> Vec<MeltedRow>
where
    C: YearClassifier + ?Sized,
{
    let mut melted = Vec::new();

    for row in rows {
        for event_type in event_types {
            let mut buckets: BTreeMap<YearBucket, u32> = BTreeMap::new();
            for ((_, term), count) in row
                .term_counts
                .iter()
                .filter(|((counted_type, _), _)| counted_type == event_type)
            {
                let bucket = classifier.classify(&row.student_id, &row.attributes, *term);
                *buckets.entry(bucket).or_insert(0) += count;
            }

            for (year_bucket, count) in buckets {
                if count == 0 {
                    continue;
                }
                melted.push(MeltedRow {
                    student_id: row.student_id.clone(),
                    attributes: row.attributes.clone(),
                    event_type: *event_type,
                    count,
                    year_bucket,
                });
            }
        }
    }

    melted
}

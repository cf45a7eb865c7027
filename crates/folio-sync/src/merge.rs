//! Local/remote annotation merge.
//!
//! Records are matched by [`MergeKey`] (document + CFI), never by `id`. For a
//! shared key the record with the strictly greater `updated_at` wins and an
//! exact tie goes to the local record. Keys present on one side only are kept
//! as-is, which means a remote deletion never removes a local record here.

use std::collections::HashMap;

use tracing::trace;

use folio_core::{AnnotationRecord, MergeKey};

/// Merge a local and a remote annotation set into one record per key.
///
/// Output order is deterministic: keys in first-seen local order, followed by
/// remote-only keys in first-seen remote order.
pub fn merge(local: &[AnnotationRecord], remote: &[AnnotationRecord]) -> Vec<AnnotationRecord> {
    let mut winners = deduplicated(local);
    let mut index: HashMap<MergeKey<'_>, usize> = winners
        .iter()
        .copied()
        .enumerate()
        .map(|(i, r)| (r.merge_key(), i))
        .collect();

    // `deduplicated` leaves one candidate per key, so a hit is always a local key.
    for candidate in deduplicated(remote) {
        match index.get(&candidate.merge_key()) {
            Some(&i) => {
                if candidate.updated_at > winners[i].updated_at {
                    trace!(location_key = %candidate.location_key, "Remote record is newer");
                    winners[i] = candidate;
                }
            }
            None => {
                index.insert(candidate.merge_key(), winners.len());
                winners.push(candidate);
            }
        }
    }

    winners.into_iter().cloned().collect()
}

/// Collapse duplicate keys within one side, keeping the newest record
/// (the earliest one on an exact tie).
fn deduplicated(records: &[AnnotationRecord]) -> Vec<&AnnotationRecord> {
    let mut out: Vec<&AnnotationRecord> = Vec::with_capacity(records.len());
    let mut index: HashMap<MergeKey<'_>, usize> = HashMap::with_capacity(records.len());
    for record in records {
        match index.get(&record.merge_key()) {
            Some(&i) => {
                if record.updated_at > out[i].updated_at {
                    out[i] = record;
                }
            }
            None => {
                index.insert(record.merge_key(), out.len());
                out.push(record);
            }
        }
    }
    out
}

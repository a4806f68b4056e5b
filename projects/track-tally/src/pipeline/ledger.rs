// Aggregation ledger: folds per-frame detections into per-track tallies.

use crate::pipeline::types::Detection;
use std::collections::{BTreeMap, HashMap};

/// Running tally for a single track id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackObservation {
    pub last_class_label: String,
    pub observation_count: usize,
}

/// Per-track observation counts plus the most recent class label of each track.
///
/// Totals per class are derived on demand from the last label of every track,
/// so a track that drifts from "truck" to "car" counts entirely as "car".
#[derive(Debug, Default)]
pub struct AggregationLedger {
    tracks: HashMap<u64, TrackObservation>,
}

impl AggregationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one processed frame. Detections without a track id are ignored.
    pub fn record(&mut self, detections: &[Detection]) {
        for detection in detections {
            let Some(track_id) = detection.track_id else {
                continue;
            };
            self.tracks
                .entry(track_id)
                .and_modify(|obs| {
                    obs.observation_count += 1;
                    obs.last_class_label.clone_from(&detection.class_label);
                })
                .or_insert_with(|| TrackObservation {
                    last_class_label: detection.class_label.clone(),
                    observation_count: 1,
                });
        }
    }

    /// Sums observation counts grouped by each track's last label.
    pub fn finalize(&self) -> BTreeMap<String, usize> {
        let mut totals = BTreeMap::new();
        for obs in self.tracks.values() {
            *totals.entry(obs.last_class_label.clone()).or_insert(0) += obs.observation_count;
        }
        totals
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    #[cfg(test)]
    pub fn observation(&self, track_id: u64) -> Option<&TrackObservation> {
        self.tracks.get(&track_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::BBox;

    fn det(label: &str, track_id: Option<u64>) -> Detection {
        Detection {
            class_label: label.to_string(),
            confidence: 0.9,
            bbox: BBox {
                x1: 0,
                y1: 0,
                x2: 10,
                y2: 10,
            },
            track_id,
        }
    }

    #[test]
    fn test_empty_ledger_finalizes_empty() {
        let ledger = AggregationLedger::new();
        assert!(ledger.finalize().is_empty());
        assert_eq!(ledger.track_count(), 0);
    }

    #[test]
    fn test_grouping_by_label() {
        let mut ledger = AggregationLedger::new();
        for _ in 0..3 {
            ledger.record(&[det("car", Some(1))]);
        }
        for _ in 0..2 {
            ledger.record(&[det("car", Some(2))]);
        }
        let totals = ledger.finalize();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals["car"], 5);
    }

    #[test]
    fn test_last_label_wins() {
        let mut ledger = AggregationLedger::new();
        ledger.record(&[det("truck", Some(7))]);
        ledger.record(&[det("car", Some(7))]);
        ledger.record(&[det("car", Some(7))]);

        let totals = ledger.finalize();
        assert_eq!(totals.get("car"), Some(&3));
        assert_eq!(totals.get("truck"), None);
        assert_eq!(ledger.observation(7).unwrap().last_class_label, "car");
    }

    #[test]
    fn test_count_tracks_record_calls() {
        let mut ledger = AggregationLedger::new();
        for n in 1..=25 {
            ledger.record(&[det("person", Some(3)), det("dog", Some(4))]);
            assert_eq!(ledger.observation(3).unwrap().observation_count, n);
            assert_eq!(ledger.observation(4).unwrap().observation_count, n);
        }
    }

    #[test]
    fn test_untracked_detections_ignored() {
        let mut ledger = AggregationLedger::new();
        ledger.record(&[det("person", None), det("person", Some(1)), det("cat", None)]);
        assert_eq!(ledger.track_count(), 1);
        assert_eq!(ledger.finalize()["person"], 1);
    }

    #[test]
    fn test_finalize_idempotent() {
        let mut ledger = AggregationLedger::new();
        ledger.record(&[det("car", Some(1)), det("bus", Some(2))]);
        ledger.record(&[det("car", Some(1))]);
        let first = ledger.finalize();
        let second = ledger.finalize();
        assert_eq!(first, second);
        assert_eq!(first["car"], 2);
        assert_eq!(first["bus"], 1);
    }
}

//! IoU tracking context.
//!
//! Assigns persistent ids to detections across consecutive inference calls:
//! 1. Every (detection, live track) pair above the IoU threshold is a candidate
//! 2. Candidates are matched greedily, highest IoU first
//! 3. Unmatched confident detections open new tracks, the rest stay untracked
//! 4. Tracks unmatched for too many calls are retired
//!
//! Association ignores class labels, so a track can change label mid-run.

use crate::pipeline::types::{BBox, Detection};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// Minimum IoU for a detection to continue an existing track
    pub iou_threshold: f32,
    /// Minimum confidence for an unmatched detection to open a track
    pub new_track_confidence: f32,
    /// Calls a track may go unmatched before it is retired
    pub max_lost_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            new_track_confidence: 0.4,
            max_lost_frames: 30,
        }
    }
}

#[derive(Debug, Clone)]
struct LiveTrack {
    id: u64,
    bbox: BBox,
    frames_lost: u32,
}

/// Tracking state threaded through every inference call of one run.
#[derive(Debug)]
pub struct TrackingContext {
    config: TrackerConfig,
    tracks: Vec<LiveTrack>,
    next_id: u64,
}

impl Default for TrackingContext {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl TrackingContext {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Fills `track_id` on each detection that belongs to a track.
    pub fn assign(&mut self, detections: &mut [Detection]) {
        let mut candidates = Vec::new();
        for (det_idx, det) in detections.iter().enumerate() {
            for (track_idx, track) in self.tracks.iter().enumerate() {
                let iou = det.bbox.iou(&track.bbox);
                if iou >= self.config.iou_threshold {
                    candidates.push((iou, det_idx, track_idx));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut det_matched = vec![false; detections.len()];
        let mut track_matched = vec![false; self.tracks.len()];

        for (_, det_idx, track_idx) in candidates {
            if det_matched[det_idx] || track_matched[track_idx] {
                continue;
            }
            det_matched[det_idx] = true;
            track_matched[track_idx] = true;

            let track = &mut self.tracks[track_idx];
            track.bbox = detections[det_idx].bbox;
            track.frames_lost = 0;
            detections[det_idx].track_id = Some(track.id);
        }

        for (track, matched) in self.tracks.iter_mut().zip(&track_matched) {
            if !matched {
                track.frames_lost += 1;
            }
        }
        let max_lost = self.config.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        for (det, matched) in detections.iter_mut().zip(det_matched) {
            if matched {
                continue;
            }
            if det.confidence >= self.config.new_track_confidence {
                let id = self.next_id;
                self.next_id += 1;
                self.tracks.push(LiveTrack {
                    id,
                    bbox: det.bbox,
                    frames_lost: 0,
                });
                det.track_id = Some(id);
            } else {
                det.track_id = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, conf: f32, x: i32, y: i32) -> Detection {
        Detection {
            class_label: label.to_string(),
            confidence: conf,
            bbox: BBox {
                x1: x,
                y1: y,
                x2: x + 40,
                y2: y + 40,
            },
            track_id: None,
        }
    }

    #[test]
    fn test_ids_persist_across_overlapping_boxes() {
        let mut ctx = TrackingContext::default();

        let mut first = vec![det("person", 0.9, 0, 0), det("car", 0.8, 200, 200)];
        ctx.assign(&mut first);
        assert_eq!(first[0].track_id, Some(1));
        assert_eq!(first[1].track_id, Some(2));

        // Small motion, reversed order
        let mut second = vec![det("car", 0.8, 205, 203), det("person", 0.9, 4, 2)];
        ctx.assign(&mut second);
        assert_eq!(second[0].track_id, Some(2));
        assert_eq!(second[1].track_id, Some(1));
        assert_eq!(ctx.live_tracks(), 2);
    }

    #[test]
    fn test_low_confidence_detection_not_tracked() {
        let mut ctx = TrackingContext::default();
        let mut dets = vec![det("person", 0.2, 0, 0)];
        ctx.assign(&mut dets);
        assert_eq!(dets[0].track_id, None);
        assert_eq!(ctx.live_tracks(), 0);
    }

    #[test]
    fn test_low_confidence_continues_existing_track() {
        let mut ctx = TrackingContext::default();
        let mut dets = vec![det("person", 0.9, 0, 0)];
        ctx.assign(&mut dets);
        let mut dets = vec![det("person", 0.2, 2, 2)];
        ctx.assign(&mut dets);
        assert_eq!(dets[0].track_id, Some(1));
    }

    #[test]
    fn test_label_change_keeps_id() {
        let mut ctx = TrackingContext::default();
        let mut dets = vec![det("truck", 0.9, 50, 50)];
        ctx.assign(&mut dets);
        let mut dets = vec![det("car", 0.9, 52, 50)];
        ctx.assign(&mut dets);
        assert_eq!(dets[0].track_id, Some(1));
    }

    #[test]
    fn test_lost_tracks_retired() {
        let mut ctx = TrackingContext::new(TrackerConfig {
            max_lost_frames: 2,
            ..TrackerConfig::default()
        });
        let mut dets = vec![det("person", 0.9, 0, 0)];
        ctx.assign(&mut dets);

        for _ in 0..3 {
            ctx.assign(&mut []);
        }
        assert_eq!(ctx.live_tracks(), 0);

        // Same place again opens a fresh id
        let mut dets = vec![det("person", 0.9, 0, 0)];
        ctx.assign(&mut dets);
        assert_eq!(dets[0].track_id, Some(2));
    }

    #[test]
    fn test_one_detection_per_track() {
        let mut ctx = TrackingContext::default();
        let mut dets = vec![det("person", 0.9, 0, 0)];
        ctx.assign(&mut dets);

        let mut dets = vec![det("person", 0.9, 1, 1), det("person", 0.9, 3, 3)];
        ctx.assign(&mut dets);
        let ids: Vec<_> = dets.iter().map(|d| d.track_id).collect();
        assert!(ids.contains(&Some(1)));
        assert!(ids.contains(&Some(2)));
    }
}

use crate::pipeline::types::Detection;
use anyhow::Result;
use opencv::core::{Mat, Point, Rect, Scalar, Vector};
use opencv::imgproc::{put_text, rectangle, FONT_HERSHEY_SIMPLEX, LINE_8};

/// Display label for a detection, e.g. `"car 0.87 ID: 4"`.
pub fn label_for(detection: &Detection) -> String {
    let mut label = format!("{} {:.2}", detection.class_label, detection.confidence);
    if let Some(id) = detection.track_id {
        label.push_str(&format!(" ID: {}", id));
    }
    label
}

/// Draws boxes and labels onto frames. Holds only drawing parameters.
#[derive(Debug, Clone)]
pub struct Annotator {
    color: Scalar,
    thickness: i32,
    font_scale: f64,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            color: Scalar::new(0.0, 255.0, 0.0, 0.0), // Green (BGR)
            thickness: 2,
            font_scale: 0.5,
        }
    }
}

impl Annotator {
    pub fn annotate(&self, frame: &mut Mat, detections: &[Detection]) -> Result<()> {
        for d in detections {
            let rect = Rect::new(d.bbox.x1, d.bbox.y1, d.bbox.width(), d.bbox.height());
            rectangle(frame, rect, self.color, self.thickness, LINE_8, 0)?;

            put_text(
                frame,
                &label_for(d),
                Point::new(d.bbox.x1, d.bbox.y1 - 10),
                FONT_HERSHEY_SIMPLEX,
                self.font_scale,
                self.color,
                self.thickness,
                LINE_8,
                false,
            )?;
        }
        Ok(())
    }
}

/// JPEG-encodes a frame for display surfaces.
pub fn encode_jpeg(frame: &Mat) -> Result<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    opencv::imgcodecs::imencode(".jpg", frame, &mut buf, &Vector::new())?;
    Ok(buf.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::BBox;
    use opencv::core::{self, Vec3b};
    use opencv::prelude::*;

    fn det(track_id: Option<u64>) -> Detection {
        Detection {
            class_label: "car".to_string(),
            confidence: 0.873,
            bbox: BBox {
                x1: 20,
                y1: 30,
                x2: 60,
                y2: 70,
            },
            track_id,
        }
    }

    #[test]
    fn test_label_with_and_without_track() {
        assert_eq!(label_for(&det(Some(4))), "car 0.87 ID: 4");
        assert_eq!(label_for(&det(None)), "car 0.87");
    }

    #[test]
    fn test_annotate_draws_box_edge() {
        let mut frame =
            Mat::new_rows_cols_with_default(100, 100, core::CV_8UC3, Scalar::all(0.0)).unwrap();
        Annotator::default()
            .annotate(&mut frame, &[det(Some(1))])
            .unwrap();

        // Left edge of the rectangle is green
        let px = *frame.at_2d::<Vec3b>(50, 20).unwrap();
        assert_eq!(px[1], 255);
        // Box interior untouched
        let inner = *frame.at_2d::<Vec3b>(50, 40).unwrap();
        assert_eq!(inner[1], 0);
    }

    #[test]
    fn test_encode_jpeg_header() {
        let frame =
            Mat::new_rows_cols_with_default(16, 16, core::CV_8UC3, Scalar::all(128.0)).unwrap();
        let jpeg = encode_jpeg(&frame).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}

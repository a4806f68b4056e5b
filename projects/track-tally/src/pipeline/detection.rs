use crate::config::DetectorSettings;
use crate::pipeline::tracker::TrackingContext;
use crate::pipeline::types::{BBox, Detection};
use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageBuffer, Rgb};
use opencv::core::Mat;
use opencv::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use usls::models::RTDETR;
use usls::{Config, Image};

/// Detection + tracking capability consumed by the orchestrator.
///
/// The same `TrackingContext` must be passed to every call of one run so
/// track ids persist; each run starts from a fresh context.
pub trait DetectorTracker {
    /// Class-label vocabulary, indexed by class id.
    fn class_names(&self) -> &[String];

    fn infer(&mut self, frame: &Mat, context: &mut TrackingContext) -> Result<Vec<Detection>>;
}

/// A wrapper around the USLS RT-DETR model that handles BGR-to-RGB conversion
/// and corrects for aspect-ratio padding bugs in the underlying model library.
pub struct ObjectDetector {
    model: RTDETR,
    class_names: Vec<String>,
    min_conf: f32,
}

impl ObjectDetector {
    /// Create a new detector with the given model path.
    pub fn new(model_path: &str, min_conf: f32) -> Result<Self> {
        let config = Config::default()
            .with_model_file(model_path)
            .with_class_names(&usls::NAMES_COCO_80);

        #[cfg(target_os = "macos")]
        let config = config.with_model_device(usls::Device::CoreMl);

        let config = config.commit()?;
        let model = RTDETR::new(config)?;
        tracing::info!("Loaded RT-DETR model from {}", model_path);
        Ok(Self {
            model,
            class_names: usls::NAMES_COCO_80.iter().map(|s| s.to_string()).collect(),
            min_conf,
        })
    }

    pub fn set_min_confidence(&mut self, min_conf: f32) {
        self.min_conf = min_conf;
    }

    /// Run raw detection on an OpenCV Mat, boxes in frame pixel coordinates.
    pub fn detect(&mut self, image: &Mat) -> Result<Vec<usls::Hbb>> {
        let dynamic_image = mat_to_dynamic_image(image)?;

        // Correction calculations (USLS RT-DETR bug workaround)
        let size = image.size()?;
        let img_w = size.width as f32;
        let img_h = size.height as f32;
        let (x_correction, y_correction) = if img_w > img_h {
            (img_w / img_h, 1.0)
        } else if img_h > img_w {
            (1.0, img_h / img_w)
        } else {
            (1.0, 1.0)
        };

        let results = self.model.forward(&[Image::from(dynamic_image)])?;
        let hbbs = results
            .into_iter()
            .next()
            .map(|y| y.hbbs)
            .unwrap_or_default();

        Ok(hbbs
            .into_iter()
            .map(|hbb| {
                let x = hbb.xmin() * x_correction;
                let w = hbb.width() * x_correction;
                let y = hbb.ymin() * y_correction;
                let h = hbb.height() * y_correction;

                let mut new_hbb = usls::Hbb::default().with_xyxy(x, y, x + w, y + h);
                if let Some(conf) = hbb.confidence() {
                    new_hbb = new_hbb.with_confidence(conf);
                }
                if let Some(id) = hbb.id() {
                    new_hbb = new_hbb.with_id(id);
                }
                if let Some(name) = hbb.name() {
                    new_hbb = new_hbb.with_name(name);
                }
                new_hbb
            })
            .collect())
    }

    fn to_detection(&self, hbb: &usls::Hbb) -> Option<Detection> {
        let confidence = hbb.confidence().unwrap_or(0.0);
        if confidence < self.min_conf {
            return None;
        }
        let class_label = hbb
            .name()
            .map(|s| s.to_string())
            .or_else(|| hbb.id().and_then(|id| self.class_names.get(id).cloned()))?;
        let bbox = BBox::from_xyxy(
            hbb.xmin(),
            hbb.ymin(),
            hbb.xmin() + hbb.width(),
            hbb.ymin() + hbb.height(),
        )?;
        Some(Detection {
            class_label,
            confidence,
            bbox,
            track_id: None,
        })
    }
}

impl DetectorTracker for ObjectDetector {
    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn infer(&mut self, frame: &Mat, context: &mut TrackingContext) -> Result<Vec<Detection>> {
        let hbbs = self.detect(frame)?;
        let mut detections: Vec<Detection> =
            hbbs.iter().filter_map(|h| self.to_detection(h)).collect();
        context.assign(&mut detections);
        tracing::debug!(
            "Inference: {} raw boxes, {} kept, {} live tracks",
            hbbs.len(),
            detections.len(),
            context.live_tracks()
        );
        Ok(detections)
    }
}

/// Loaded values keyed by model path, shared across runs.
///
/// The map lock is only held for lookups and inserts, never while loading.
/// Entries whose mutex was poisoned by a panicking run are dropped and
/// loaded again on the next request.
pub struct ModelCache<T> {
    entries: Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T> ModelCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, key: &str) -> Option<Arc<Mutex<T>>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.is_poisoned() => {
                tracing::warn!("Evicting poisoned model entry {}", key);
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    pub fn get_or_load<F>(&self, key: &str, load: F) -> Result<Arc<Mutex<T>>>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(entry) = self.lookup(key) {
            return Ok(entry);
        }
        let loaded = Arc::new(Mutex::new(load()?));

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        // A concurrent load of the same key may have finished first
        let entry = match entries.get(key) {
            Some(existing) if !existing.is_poisoned() => existing.clone(),
            _ => {
                entries.insert(key.to_string(), loaded.clone());
                loaded
            }
        };
        Ok(entry)
    }
}

impl<T> Default for ModelCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    static ref DETECTOR_CACHE: ModelCache<ObjectDetector> = ModelCache::new();
}

/// Returns the cached detector for `settings.model_path`, loading it on first use.
///
/// The confidence threshold is per run: callers apply it with
/// `set_min_confidence` once they hold the lock.
pub fn shared_detector(settings: &DetectorSettings) -> Result<Arc<Mutex<ObjectDetector>>> {
    let model_path = &settings.model_path;
    DETECTOR_CACHE.get_or_load(model_path, || {
        if !Path::new(model_path).is_file() {
            return Err(anyhow!("Model file not found: {}", model_path));
        }
        ObjectDetector::new(model_path, settings.min_confidence)
            .with_context(|| format!("Failed to load model: {}", model_path))
    })
}

/// Convert an OpenCV Mat (BGR) to an image::DynamicImage (RGB)
fn mat_to_dynamic_image(mat: &Mat) -> Result<DynamicImage> {
    let mut rgb_mat = Mat::default();
    opencv::imgproc::cvt_color_def(mat, &mut rgb_mat, opencv::imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    let width = size.width as u32;
    let height = size.height as u32;

    if !rgb_mat.is_continuous() {
        return Err(anyhow!("Mat is not continuous"));
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();
    let img_buffer = ImageBuffer::<Rgb<u8>, _>::from_vec(width, height, buffer)
        .ok_or_else(|| anyhow!("Failed to create ImageBuffer from Mat data"))?;

    Ok(DynamicImage::ImageRgb8(img_buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{self, Scalar, Vec3b};

    #[test]
    fn test_mat_to_dynamic_image_swaps_channels() {
        let mat = Mat::new_rows_cols_with_default(
            4,
            6,
            core::CV_8UC3,
            Scalar::new(10.0, 20.0, 30.0, 0.0),
        )
        .unwrap();
        let px = *mat.at_2d::<Vec3b>(0, 0).unwrap();
        assert_eq!((px[0], px[2]), (10, 30));

        let img = mat_to_dynamic_image(&mat).unwrap().to_rgb8();
        assert_eq!(img.width(), 6);
        assert_eq!(img.height(), 4);
        assert_eq!(img.get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn test_cache_loads_each_key_once() {
        let cache = ModelCache::new();
        let mut loads = 0;
        let a = cache
            .get_or_load("a.onnx", || {
                loads += 1;
                Ok(1u32)
            })
            .unwrap();
        let b = cache.get_or_load("a.onnx", || Ok(2u32)).unwrap();
        assert_eq!(loads, 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b.lock().unwrap(), 1);
    }

    #[test]
    fn test_cache_reloads_poisoned_entry() {
        let cache = ModelCache::new();
        let first = cache.get_or_load("m.onnx", || Ok(1u32)).unwrap();

        let poisoner = first.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("inference crashed");
        })
        .join();
        assert!(first.is_poisoned());

        let second = cache.get_or_load("m.onnx", || Ok(2u32)).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*second.lock().unwrap(), 2);
    }

    #[test]
    fn test_cache_load_error_not_stored() {
        let cache: ModelCache<u32> = ModelCache::new();
        assert!(cache.get_or_load("x", || Err(anyhow!("boom"))).is_err());
        assert_eq!(*cache.get_or_load("x", || Ok(7)).unwrap().lock().unwrap(), 7);
    }

    #[test]
    fn test_missing_model_file_rejected() {
        let settings = DetectorSettings {
            model_path: "/nonexistent/track-tally/model.onnx".to_string(),
            min_confidence: 0.25,
        };
        let err = shared_detector(&settings).unwrap_err();
        assert!(err.to_string().contains("Model file not found"));
    }
}

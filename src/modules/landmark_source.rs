use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Error;
use log::{debug, warn};
use nalgebra::center;
use opencv::core::Mat;

use crate::utils::coordinate::LandmarkSet;

/// Opaque landmark detector: one face per image or `None` when no face is found.
pub trait LandmarkSource {
    fn detect(&self, image: &Mat) -> Result<Option<LandmarkSet>, Error>;
}

impl<S: LandmarkSource + ?Sized> LandmarkSource for Arc<S> {
    fn detect(&self, image: &Mat) -> Result<Option<LandmarkSet>, Error> {
        (**self).detect(image)
    }
}

/// Adapts a closure, e.g. a binding to an external detector.
pub struct FnLandmarkSource<F>(pub F);

impl<F> LandmarkSource for FnLandmarkSource<F>
where
    F: Fn(&Mat) -> Result<Option<LandmarkSet>, Error>,
{
    fn detect(&self, image: &Mat) -> Result<Option<LandmarkSet>, Error> {
        (self.0)(image)
    }
}

/// Returns the same landmarks for every image, e.g. landmarks computed
/// offline by an external detector and stored as JSON.
#[derive(Debug, Clone)]
pub struct StaticLandmarkSource {
    landmarks: Option<LandmarkSet>,
}

impl StaticLandmarkSource {
    pub fn new(landmarks: Option<LandmarkSet>) -> Self {
        StaticLandmarkSource { landmarks }
    }

    /// Reads `{"chin": [[x, y], ...], ...}`. A JSON `null` means no face.
    pub fn from_json_file(path: &Path) -> Result<Self, Error> {
        let json = fs::read_to_string(path)
            .map_err(|e| Error::from(e).context(format!("cannot read landmarks {}", path.display())))?;
        let landmarks: Option<LandmarkSet> = serde_json::from_str(&json)?;
        Ok(Self::new(landmarks))
    }
}

impl LandmarkSource for StaticLandmarkSource {
    fn detect(&self, _image: &Mat) -> Result<Option<LandmarkSet>, Error> {
        Ok(self.landmarks.clone())
    }
}

/// Wraps a landmark source with the per-stream video filter.
///
/// In video mode the last successful detection is kept. A missed frame then
/// gets that estimate expanded about its bounding box center, so the coarse
/// crop grows to cover wherever the face moved. One instance per stream.
#[derive(Debug)]
pub struct LandmarksExtractor<S> {
    source: S,
    video_mode: bool,
    previous: Option<LandmarkSet>,
}

const VIDEO_FALLBACK_EXPANSION: f64 = 2.0;

impl<S: LandmarkSource> LandmarksExtractor<S> {
    pub fn new(source: S, video_mode: bool) -> Self {
        LandmarksExtractor {
            source,
            video_mode,
            previous: None,
        }
    }

    /// Forgets the stream state, e.g. at a scene cut.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// extract detects the landmarks of the face in one image or frame.
    ///
    /// In video mode a missed detection falls back to the previous face.
    ///
    /// # Arguments
    /// * `image` - RGB OpenCV matrix
    ///
    /// # Returns
    /// * `Result<Option<LandmarkSet>, Error>` - `None` when no face is available
    pub fn extract(&mut self, image: &Mat) -> Result<Option<LandmarkSet>, Error> {
        let landmarks = self.source.detect(image)?;
        if !self.video_mode {
            return Ok(landmarks);
        }

        match landmarks {
            Some(landmarks) => {
                self.previous = Some(landmarks.clone());
                Ok(Some(landmarks))
            }
            None => match &self.previous {
                Some(previous) => {
                    warn!("no face detected in frame, falling back to the previous landmarks");
                    Ok(Some(expand_about_center(previous.clone(), VIDEO_FALLBACK_EXPANSION)))
                }
                None => {
                    debug!("no face detected and no previous landmarks in the stream");
                    Ok(None)
                }
            },
        }
    }
}

fn expand_about_center(landmarks: LandmarkSet, factor: f64) -> LandmarkSet {
    let (lo, hi) = landmarks.bounds();
    let mid = center(&lo, &hi);
    landmarks.remap(|p| mid + (p - mid) * factor)
}

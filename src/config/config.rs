use std::fs;
use std::path::Path;

use anyhow::Error;
use serde::{Deserialize, Serialize};

/// Settings of the face extraction chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Relative enlargement (> 0) or shrinkage (< 0) of both crops.
    pub margin: f64,
    /// Morphological kernel size in percent of the coarse crop height.
    /// Positive values dilate the mask, negative values erode it.
    pub mask_factor: f64,
    /// Binary mask when set, Gaussian feathered mask otherwise.
    pub sharp_edge: bool,
    /// Reuse the previous landmarks of the stream when detection misses.
    pub video_mode: bool,
}

impl ExtractorConfig {
    pub fn new() -> Self {
        ExtractorConfig {
            margin: 0.05,
            mask_factor: 10.0,
            sharp_edge: true,
            video_mode: false,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Which tensor the external model expects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelInputKind {
    Image,
    Landmarks,
    LandmarksLowRes { resolution: i32 },
    LandmarksHistogram,
}

/// Value range of the images produced by the external model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputRange {
    /// `[0, 1]`
    Unit,
    /// `[0, 255]`
    Byte,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnonymizerConfig {
    pub extractor: ExtractorConfig,
    pub model_input: ModelInputKind,
    /// Model input resolution as `(width, height)`.
    pub image_size: (i32, i32),
    pub output_range: OutputRange,
}

impl AnonymizerConfig {
    pub fn new() -> Self {
        AnonymizerConfig {
            extractor: ExtractorConfig::new(),
            model_input: ModelInputKind::LandmarksLowRes { resolution: 8 },
            image_size: (128, 128),
            output_range: OutputRange::Unit,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let json = fs::read_to_string(path)
            .map_err(|e| Error::from(e).context(format!("cannot read config {}", path.display())))?;
        Self::from_json_str(&json)
    }
}

impl Default for AnonymizerConfig {
    fn default() -> Self {
        Self::new()
    }
}

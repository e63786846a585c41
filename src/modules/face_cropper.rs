use anyhow::Error;
use log::debug;
use nalgebra::Vector2;
use opencv::core::{Mat, MatTraitConst};
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;
use crate::utils::coordinate::{BoundingBox, LandmarkSet, Offsets};
use crate::utils::image::crop_with_padding;

/// Extra coarse margin so no landmark leaves the canvas during alignment.
pub const COARSE_SAFETY_FACTOR: f64 = 1.05;

// Keeps pixel arithmetic far away from i32 overflow for absurd inputs.
const PIXEL_LIMIT: f64 = (1 << 28) as f64;

fn to_pixel(value: f64) -> i32 {
    value.clamp(-PIXEL_LIMIT, PIXEL_LIMIT) as i32
}

/// A square crop of `size` pixels.
///
/// `bounding_box` is the part of the source image that is copied,
/// `offsets` is where that part lands inside the square. The rest is zero.
///
/// Landmarks move by `origin`. For a box entirely outside the image the
/// offsets are clamped into the square, so `bounding_box - offsets` is not
/// the origin there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub bounding_box: BoundingBox,
    pub offsets: Offsets,
    pub size: i32,
    /// Top-left corner of the square in source coordinates.
    pub origin: (i32, i32),
}

impl CropRegion {
    /// Clips the requested box `[left, right) x [top, bottom)` to a
    /// `width x height` image. The box sits at `(pad_x, pad_y)` inside the square.
    #[allow(clippy::too_many_arguments)]
    fn clip(
        left: i32, right: i32, top: i32, bottom: i32,
        pad_x: i32, pad_y: i32, size: i32,
        width: i32, height: i32,
    ) -> Self {
        let left_c = left.clamp(0, width);
        let right_c = right.clamp(0, width).max(left_c);
        let top_c = top.clamp(0, height);
        let bottom_c = bottom.clamp(0, height).max(top_c);

        let offset_left = (pad_x + left_c - left).clamp(0, size);
        let offset_top = (pad_y + top_c - top).clamp(0, size);
        let valid_width = (right_c - left_c).min(size - offset_left);
        let valid_height = (bottom_c - top_c).min(size - offset_top);

        CropRegion {
            bounding_box: BoundingBox::new(left_c, left_c + valid_width, top_c, top_c + valid_height),
            offsets: BoundingBox::new(
                offset_left,
                offset_left + valid_width,
                offset_top,
                offset_top + valid_height,
            ),
            size,
            origin: (left - pad_x, top - pad_y),
        }
    }

    /// Zero-pads and copies the region out of `image`. Works for any `Mat` type.
    pub fn apply(&self, image: &Mat) -> Result<Mat, Error> {
        crop_with_padding(image, &self.bounding_box, &self.offsets, self.size)
    }

    /// Moves landmarks from the source frame into the crop frame.
    pub fn shift_landmarks(&self, landmarks: LandmarkSet) -> LandmarkSet {
        landmarks.translate(Vector2::new(-self.origin.0 as f64, -self.origin.1 as f64))
    }
}

/// Square crop centred on the landmark centroid, sized by the largest
/// landmark distance to that centroid plus a margin.
#[derive(Debug, Clone)]
pub struct FaceCropperCoarse {
    margin: f64,
}

impl FaceCropperCoarse {
    /// `margin > 0` enlarges the crop, `margin < 0` shrinks it.
    pub fn new(margin: f64) -> Self {
        FaceCropperCoarse { margin }
    }

    /// call crops a square around the face, zero-padded where it leaves the image.
    ///
    /// # Arguments
    /// * `image` - OpenCV matrix
    /// * `landmarks` - LandmarkSet in the frame of `image`
    ///
    /// # Returns
    /// * `Result<(Mat, LandmarkSet, CropRegion), Error>` - crop, landmarks in the crop frame and the crop geometry
    pub fn call(&self, image: &Mat, landmarks: LandmarkSet) -> Result<(Mat, LandmarkSet, CropRegion), Error> {
        let region = self.calculate_bounding_box(image, &landmarks)?;
        let cropped = region.apply(image)?;
        debug!("coarse crop: {region:?}");
        Ok((cropped, region.shift_landmarks(landmarks), region))
    }

    pub fn calculate_bounding_box(&self, image: &Mat, landmarks: &LandmarkSet) -> Result<CropRegion, Error> {
        let center = landmarks.centroid();
        let max_distance = landmarks.max_distance_from(&center);

        let half = (max_distance * (1.0 + self.margin)).floor();
        // also rejects NaN coordinates
        if !(max_distance > 0.0 && half >= 1.0) {
            return Err(ExtractionError::DegenerateGeometry { stage: "coarse" }.into());
        }
        let half = to_pixel(half).min(i32::MAX / 8);
        let size = half * 2;

        let left = to_pixel(center.x.floor()) - half;
        let top = to_pixel(center.y.floor()) - half;

        Ok(CropRegion::clip(
            left, left + size, top, top + size,
            0, 0, size,
            image.cols(), image.rows(),
        ))
    }
}

/// Tight crop around the aligned landmarks plus a margin relative to the
/// image size, zero-padded symmetrically to a square.
#[derive(Debug, Clone)]
pub struct FaceCropperFine {
    margin: f64,
}

impl FaceCropperFine {
    pub fn new(margin: f64) -> Self {
        FaceCropperFine { margin }
    }

    /// call crops the aligned face tightly and pads it to a square.
    ///
    /// # Arguments
    /// * `image` - OpenCV matrix of the aligned coarse crop
    /// * `landmarks` - LandmarkSet in the frame of `image`
    ///
    /// # Returns
    /// * `Result<(Mat, LandmarkSet, CropRegion), Error>` - extracted face, landmarks in its frame and the crop geometry
    pub fn call(&self, image: &Mat, landmarks: LandmarkSet) -> Result<(Mat, LandmarkSet, CropRegion), Error> {
        let region = self.calculate_bounding_box(image, &landmarks)?;
        let cropped = region.apply(image)?;
        debug!("fine crop: {region:?}");
        Ok((cropped, region.shift_landmarks(landmarks), region))
    }

    pub fn calculate_bounding_box(&self, image: &Mat, landmarks: &LandmarkSet) -> Result<CropRegion, Error> {
        let (width, height) = (image.cols(), image.rows());
        let (lo, hi) = landmarks.bounds();

        let left = to_pixel((lo.x - width as f64 * self.margin).floor());
        let top = to_pixel((lo.y - height as f64 * self.margin).floor());
        let right = to_pixel((hi.x + width as f64 * self.margin).floor());
        let bottom = to_pixel((hi.y + height as f64 * self.margin).floor());

        let bb_width = right - left;
        let bb_height = bottom - top;
        let size = bb_width.max(bb_height);
        if size <= 0 {
            return Err(ExtractionError::DegenerateGeometry { stage: "fine" }.into());
        }

        let (pad_x, pad_y) = if bb_height < bb_width {
            (0, (bb_width - bb_height) / 2)
        } else {
            ((bb_height - bb_width) / 2, 0)
        };

        Ok(CropRegion::clip(left, right, top, bottom, pad_x, pad_y, size, width, height))
    }
}

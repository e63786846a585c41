use anyhow::Error;
use log::debug;
use nalgebra::Matrix2x3;
use opencv::core::{Mat, MatTraitConst, Scalar, BORDER_CONSTANT};
use opencv::imgproc::{warp_affine, INTER_LINEAR, WARP_INVERSE_MAP};

use crate::utils::coordinate::{FacialFeature, LandmarkSet, Rotation};

/// Levels the eye line by rotating about the landmark centroid.
#[derive(Debug, Clone, Default)]
pub struct FaceAligner;

impl FaceAligner {
    pub fn new() -> Self {
        FaceAligner
    }

    /// call rotates the image so that the eyes lie on a horizontal line.
    ///
    /// # Arguments
    /// * `image` - OpenCV matrix of the coarse crop
    /// * `landmarks` - LandmarkSet in the frame of `image`
    ///
    /// # Returns
    /// * `Result<(Mat, LandmarkSet, Rotation), Error>` - rotated image, rotated landmarks and the rotation applied
    pub fn call(&self, image: &Mat, landmarks: LandmarkSet) -> Result<(Mat, LandmarkSet, Rotation), Error> {
        let rotation = Self::calculate_rotation(&landmarks);
        debug!("alignment: {:.3} deg about ({:.1}, {:.1})", rotation.angle, rotation.center.x, rotation.center.y);

        let aligned_image = Self::apply_rotation(image, &rotation, INTER_LINEAR)?;
        let landmarks = landmarks.transform_affine(&rotation.matrix());
        Ok((aligned_image, landmarks, rotation))
    }

    /// Angle of the vector from the left to the right eye center. The
    /// rotation center is the centroid of all landmarks, not the eye midpoint,
    /// which keeps the face in place for the fine crop.
    pub fn calculate_rotation(landmarks: &LandmarkSet) -> Rotation {
        let center_right_eye = landmarks.feature_centroid(FacialFeature::RightEye);
        let center_left_eye = landmarks.feature_centroid(FacialFeature::LeftEye);
        let eyes = center_right_eye - center_left_eye;

        Rotation {
            angle: eyes.y.atan2(eyes.x).to_degrees(),
            center: landmarks.centroid(),
        }
    }

    /// Rotates on a canvas of the same size; uncovered areas become zero.
    /// A zero angle returns an untouched copy.
    pub fn apply_rotation(image: &Mat, rotation: &Rotation, interpolation: i32) -> Result<Mat, Error> {
        if rotation.angle == 0.0 {
            return Ok(image.try_clone()?);
        }
        warp(image, &rotation.matrix(), interpolation)
    }

    /// Maps an image from the aligned frame back to the unrotated one.
    pub fn revert_rotation(image: &Mat, rotation: &Rotation, interpolation: i32) -> Result<Mat, Error> {
        if rotation.angle == 0.0 {
            return Ok(image.try_clone()?);
        }
        warp(image, &rotation.matrix(), interpolation | WARP_INVERSE_MAP)
    }
}

fn warp(image: &Mat, matrix: &Matrix2x3<f64>, flags: i32) -> Result<Mat, Error> {
    let affine_matrix = Mat::from_slice_2d(&[
        [matrix[(0, 0)], matrix[(0, 1)], matrix[(0, 2)]],
        [matrix[(1, 0)], matrix[(1, 1)], matrix[(1, 2)]],
    ])?;

    let mut warped = Mat::default();
    warp_affine(
        image,
        &mut warped,
        &affine_matrix,
        image.size()?,
        flags,
        BORDER_CONSTANT,
        Scalar::all(0.0),
    )?;
    Ok(warped)
}

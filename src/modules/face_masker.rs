use anyhow::Error;
use log::debug;
use opencv::core::{Mat, MatTraitConst, Point, Scalar, Size, Vector, BORDER_CONSTANT, BORDER_DEFAULT, CV_32F, CV_8UC1};
use opencv::imgproc::{
    convex_hull, fill_convex_poly, gaussian_blur, get_structuring_element, morphology_default_border_value,
    morphology_ex, LINE_8, MORPH_DILATE, MORPH_ERODE, MORPH_RECT,
};

use crate::utils::coordinate::LandmarkSet;
use crate::utils::image::{apply_mask, landmarks_to_vector_of_point};

/// Suppresses the background around the face.
///
/// The mask is the convex hull of all landmarks, grown (dilation) or shrunk
/// (erosion) by a square kernel whose side is `|morphing|` percent of the
/// image height. Sharp masks are `CV_8UC1` in {0, 1}; soft masks are
/// additionally blurred with the same kernel size and stored as `CV_32FC1`.
#[derive(Debug, Clone)]
pub struct FaceMasker {
    sharp_edge: bool,
    morphing: f64,
}

impl FaceMasker {
    pub fn new(sharp_edge: bool, morphing: f64) -> Self {
        FaceMasker { sharp_edge, morphing }
    }

    /// call blacks out everything outside the face.
    ///
    /// # Arguments
    /// * `image` - OpenCV matrix
    /// * `landmarks` - &LandmarkSet in the frame of `image`
    ///
    /// # Returns
    /// * `Result<(Mat, Mat), Error>` - masked image and the mask (`CV_8UC1` sharp, `CV_32FC1` soft)
    pub fn call(&self, image: &Mat, landmarks: &LandmarkSet) -> Result<(Mat, Mat), Error> {
        let mask = self.calculate_mask(image, landmarks)?;
        let masked_image = apply_mask(image, &mask)?;
        Ok((masked_image, mask))
    }

    /// Odd kernel side length for an image of `height` rows.
    pub fn kernel_size(&self, height: i32) -> i32 {
        let k_size = (self.morphing.abs() / 100.0 * height as f64) as i32;
        if k_size % 2 == 1 { k_size } else { k_size + 1 }
    }

    pub fn calculate_mask(&self, image: &Mat, landmarks: &LandmarkSet) -> Result<Mat, Error> {
        let (height, width) = (image.rows(), image.cols());
        let mut mask = Mat::new_rows_cols_with_default(height, width, CV_8UC1, Scalar::all(0.0))?;

        let points = landmarks_to_vector_of_point(landmarks.points());
        let mut hull = Vector::<Point>::new();
        convex_hull(&points, &mut hull, false, true)?;
        fill_convex_poly(&mut mask, &hull, Scalar::all(1.0), LINE_8, 0)?;

        let k_size = self.kernel_size(height);
        let kernel = get_structuring_element(MORPH_RECT, Size::new(k_size, k_size), Point::new(-1, -1))?;
        let operation = if self.morphing > 0.0 { MORPH_DILATE } else { MORPH_ERODE };
        let mut morphed = Mat::default();
        morphology_ex(
            &mask,
            &mut morphed,
            operation,
            &kernel,
            Point::new(-1, -1),
            1,
            BORDER_CONSTANT,
            morphology_default_border_value()?,
        )?;
        debug!("mask: kernel {k_size}, morphing {}, sharp {}", self.morphing, self.sharp_edge);

        if self.sharp_edge {
            return Ok(morphed);
        }

        let mut weights = Mat::default();
        morphed.convert_to(&mut weights, CV_32F, 1.0, 0.0)?;
        let mut blurred = Mat::default();
        gaussian_blur(&weights, &mut blurred, Size::new(k_size, k_size), 0.0, 0.0, BORDER_DEFAULT)?;
        Ok(blurred)
    }
}

#[cfg(test)]
mod tests {
    use opencv::core::{count_non_zero, MatTraitConst, MatTraitConstManual, Vec3b, CV_32FC1, CV_8UC1};

    use crate::modules::face_masker::FaceMasker;
    use crate::utils::test_utils::{gradient_image, synthetic_landmarks};

    #[test]
    fn test_kernel_size_is_odd() {
        assert_eq!(FaceMasker::new(true, 10.0).kernel_size(100), 11);
        assert_eq!(FaceMasker::new(true, 10.0).kernel_size(90), 9);
        assert_eq!(FaceMasker::new(true, -10.0).kernel_size(100), 11);
        assert_eq!(FaceMasker::new(true, 0.0).kernel_size(100), 1);
    }

    #[test]
    fn test_sharp_mask_covers_face() {
        let image = gradient_image(120, 120);
        let landmarks = synthetic_landmarks((60.0, 55.0), 35.0, 0.0);
        let (masked, mask) = FaceMasker::new(true, 0.0).call(&image, &landmarks).unwrap();

        assert_eq!(mask.typ(), CV_8UC1);
        assert!(mask.data_bytes().unwrap().iter().all(|&v| v <= 1));
        let c = landmarks.centroid();
        let (cy, cx) = (c.y.round() as i32, c.x.round() as i32);
        assert_eq!(*mask.at_2d::<u8>(cy, cx).unwrap(), 1);
        assert_eq!(*mask.at_2d::<u8>(2, 2).unwrap(), 0);

        assert_eq!(masked.at_2d::<Vec3b>(cy, cx).unwrap(), image.at_2d::<Vec3b>(cy, cx).unwrap());
        assert_eq!(*masked.at_2d::<Vec3b>(2, 2).unwrap(), Vec3b::from([0, 0, 0]));
    }

    #[test]
    fn test_mask_grows_with_morphing() {
        let image = gradient_image(150, 150);
        let landmarks = synthetic_landmarks((75.0, 70.0), 40.0, 10.0);

        let area = |morphing: f64| {
            let mask = FaceMasker::new(true, morphing).calculate_mask(&image, &landmarks).unwrap();
            count_non_zero(&mask).unwrap()
        };

        let eroded = area(-10.0);
        let base = area(0.0);
        let grown: Vec<i32> = [2.0, 5.0, 10.0, 20.0].into_iter().map(area).collect();

        assert!(eroded < base);
        assert!(base <= grown[0]);
        assert!(grown.windows(2).all(|w| w[0] <= w[1]), "{grown:?}");
        assert!(grown[3] > base);
    }

    #[test]
    fn test_soft_mask_is_feathered() {
        let image = gradient_image(100, 100);
        let landmarks = synthetic_landmarks((50.0, 45.0), 30.0, 0.0);
        let mask = FaceMasker::new(false, 10.0).calculate_mask(&image, &landmarks).unwrap();

        assert_eq!(mask.typ(), CV_32FC1);
        let weights = mask.data_typed::<f32>().unwrap();
        assert!(weights.iter().all(|&w| (0.0..=1.0 + 1e-6).contains(&w)));
        assert!(weights.iter().any(|&w| w > 0.05 && w < 0.95));

        let c = landmarks.centroid();
        assert!((*mask.at_2d::<f32>(c.y.round() as i32, c.x.round() as i32).unwrap() - 1.0).abs() < 1e-5);
    }
}

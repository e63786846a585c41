use std::sync::Arc;

use anyhow::Error;
use log::{debug, info, warn};
use opencv::core::Mat;
use opencv::imgproc::{INTER_LINEAR, INTER_NEAREST};

use crate::config::config::ExtractorConfig;
use crate::modules::face_aligner::FaceAligner;
use crate::modules::face_cropper::{FaceCropperCoarse, FaceCropperFine, COARSE_SAFETY_FACTOR};
use crate::modules::face_masker::FaceMasker;
use crate::modules::landmark_source::{LandmarkSource, LandmarksExtractor};
use crate::utils::coordinate::{BoundingBox, LandmarkSet, Offsets, Rotation};

/// Everything needed to feed a model and to put its output back into the scene.
///
/// Frames: `image_cropped` and `mask` live in the coarse crop, `landmarks`,
/// `mask_fine` and `image_unmasked` in the fine crop (same frame as the
/// extracted face).
///
/// `origin_coarse` and `origin_fine` are the top-left corners of the crop
/// squares in their source frames. Landmarks are shifted by them; use them
/// rather than `bounding_box - offsets`, which differs when a crop lies
/// entirely outside its source image.
#[derive(Debug, Clone)]
pub struct ExtractionInformation {
    pub image_original: Mat,
    /// Coarse crop before masking.
    pub image_cropped: Mat,
    pub bounding_box_coarse: BoundingBox,
    pub offsets_coarse: Offsets,
    pub size_coarse: i32,
    pub origin_coarse: (i32, i32),
    pub mask: Mat,
    pub rotation: Rotation,
    pub bounding_box_fine: BoundingBox,
    pub offsets_fine: Offsets,
    pub size_fine: i32,
    pub origin_fine: (i32, i32),
    pub landmarks: LandmarkSet,
    pub mask_fine: Mat,
    pub image_unmasked: Mat,
}

/// The geometric chain: coarse crop, mask, align, fine crop.
///
/// Stateless, so one instance can serve any number of images and threads.
#[derive(Debug, Clone)]
pub struct ExtractionStages {
    coarse: FaceCropperCoarse,
    masker: FaceMasker,
    aligner: FaceAligner,
    fine: FaceCropperFine,
    sharp_edge: bool,
}

impl ExtractionStages {
    pub fn new(config: &ExtractorConfig) -> Self {
        ExtractionStages {
            coarse: FaceCropperCoarse::new(config.margin * COARSE_SAFETY_FACTOR),
            masker: FaceMasker::new(config.sharp_edge, config.mask_factor),
            aligner: FaceAligner::new(),
            fine: FaceCropperFine::new(config.margin),
            sharp_edge: config.sharp_edge,
        }
    }

    /// run applies all stages to a face whose landmarks are already known.
    ///
    /// # Arguments
    /// * `image` - RGB OpenCV matrix
    /// * `landmarks` - LandmarkSet in the frame of `image`
    ///
    /// # Returns
    /// * `Result<(Mat, ExtractionInformation), Error>`
    pub fn run(&self, image: &Mat, landmarks: LandmarkSet) -> Result<(Mat, ExtractionInformation), Error> {
        let (image_cropped, landmarks, coarse) = self.coarse.call(image, landmarks)?;
        let (image_masked, mask) = self.masker.call(&image_cropped, &landmarks)?;
        let (image_aligned, landmarks, rotation) = self.aligner.call(&image_masked, landmarks)?;

        let mask_interpolation = if self.sharp_edge { INTER_NEAREST } else { INTER_LINEAR };
        let mask_aligned = FaceAligner::apply_rotation(&mask, &rotation, mask_interpolation)?;
        let unmasked_aligned = FaceAligner::apply_rotation(&image_cropped, &rotation, INTER_LINEAR)?;

        let (face, landmarks, fine) = self.fine.call(&image_aligned, landmarks)?;
        let mask_fine = fine.apply(&mask_aligned)?;
        let image_unmasked = fine.apply(&unmasked_aligned)?;
        debug!("extracted face of {0}x{0} from a {1}x{1} coarse crop", fine.size, coarse.size);

        let information = ExtractionInformation {
            image_original: image.try_clone()?,
            image_cropped,
            bounding_box_coarse: coarse.bounding_box,
            offsets_coarse: coarse.offsets,
            size_coarse: coarse.size,
            origin_coarse: coarse.origin,
            mask,
            rotation,
            bounding_box_fine: fine.bounding_box,
            offsets_fine: fine.offsets,
            size_fine: fine.size,
            origin_fine: fine.origin,
            landmarks,
            mask_fine,
            image_unmasked,
        };
        Ok((face, information))
    }
}

/// Landmark detection followed by the extraction stages, for one stream.
#[derive(Debug)]
pub struct FaceExtractor<S> {
    landmarks: LandmarksExtractor<S>,
    stages: ExtractionStages,
}

impl<S: LandmarkSource> FaceExtractor<S> {
    pub fn new(source: S, config: &ExtractorConfig) -> Self {
        FaceExtractor {
            landmarks: LandmarksExtractor::new(source, config.video_mode),
            stages: ExtractionStages::new(config),
        }
    }

    /// Drops the video state kept between frames.
    pub fn reset(&mut self) {
        self.landmarks.reset();
    }

    /// extract detects and extracts the face of one image or frame.
    ///
    /// # Arguments
    /// * `image` - RGB OpenCV matrix
    ///
    /// # Returns
    /// * `Result<Option<(Mat, ExtractionInformation)>, Error>` - `None` when no face was found
    pub fn extract(&mut self, image: &Mat) -> Result<Option<(Mat, ExtractionInformation)>, Error> {
        match self.landmarks.extract(image)? {
            Some(landmarks) => self.stages.run(image, landmarks).map(Some),
            None => {
                info!("no face found");
                Ok(None)
            }
        }
    }
}

/// extract_batch extracts faces from independent images on the blocking thread pool.
///
/// The video filter is never applied here. Results keep the input order.
///
/// # Arguments
/// * `source` - shared landmark detector
/// * `config` - &ExtractorConfig
/// * `images` - RGB OpenCV matrices
///
/// # Returns
/// * `Result<Vec<Option<(Mat, ExtractionInformation)>>, Error>`
pub async fn extract_batch<S>(
    source: Arc<S>,
    config: &ExtractorConfig,
    images: Vec<Mat>,
) -> Result<Vec<Option<(Mat, ExtractionInformation)>>, Error>
where
    S: LandmarkSource + Send + Sync + 'static,
{
    if config.video_mode {
        warn!("video mode is ignored for batch extraction");
    }
    let stages = Arc::new(ExtractionStages::new(config));

    let handles: Vec<_> = images
        .into_iter()
        .map(|image| {
            let source = Arc::clone(&source);
            let stages = Arc::clone(&stages);
            tokio::task::spawn_blocking(move || -> Result<_, Error> {
                match source.detect(&image)? {
                    Some(landmarks) => stages.run(&image, landmarks).map(Some),
                    None => Ok(None),
                }
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await??);
    }
    debug!("batch extraction: {} faces in {} images", results.iter().flatten().count(), results.len());
    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nalgebra::Point2;
    use ndarray::Array3;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use opencv::core::{MatTraitConst, Vec3b, CV_32FC1, CV_8UC1};

    use crate::config::config::ExtractorConfig;
    use crate::error::ExtractionError;
    use crate::modules::landmark_source::StaticLandmarkSource;
    use crate::pipeline::extractor::{extract_batch, ExtractionInformation, ExtractionStages, FaceExtractor};
    use crate::utils::coordinate::LandmarkSet;
    use crate::utils::image::array3_to_mat;
    use crate::utils::test_utils::{gradient_image, mats_equal, solid_image, synthetic_landmarks, ScriptedLandmarkSource};

    fn assert_same_information(a: &ExtractionInformation, b: &ExtractionInformation) {
        assert!(mats_equal(&a.image_original, &b.image_original));
        assert!(mats_equal(&a.image_cropped, &b.image_cropped));
        assert!(mats_equal(&a.mask, &b.mask));
        assert!(mats_equal(&a.mask_fine, &b.mask_fine));
        assert!(mats_equal(&a.image_unmasked, &b.image_unmasked));
        assert_eq!(a.bounding_box_coarse, b.bounding_box_coarse);
        assert_eq!(a.offsets_coarse, b.offsets_coarse);
        assert_eq!(a.size_coarse, b.size_coarse);
        assert_eq!(a.rotation, b.rotation);
        assert_eq!(a.bounding_box_fine, b.bounding_box_fine);
        assert_eq!(a.offsets_fine, b.offsets_fine);
        assert_eq!(a.size_fine, b.size_fine);
        assert_eq!((a.origin_coarse, a.origin_fine), (b.origin_coarse, b.origin_fine));
        assert_eq!(a.landmarks, b.landmarks);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let pixels = Array3::<u8>::random((160, 200, 3), Uniform::new(0u8, 255));
        let image = array3_to_mat(&pixels).unwrap();
        let landmarks = synthetic_landmarks((95.0, 85.0), 40.0, 12.0);
        let mut extractor = FaceExtractor::new(StaticLandmarkSource::new(Some(landmarks)), &ExtractorConfig::new());

        let (face_a, info_a) = extractor.extract(&image).unwrap().unwrap();
        let (face_b, info_b) = extractor.extract(&image).unwrap().unwrap();
        assert!(mats_equal(&face_a, &face_b));
        assert_same_information(&info_a, &info_b);
    }

    #[test]
    fn test_extraction_frames() {
        let image = gradient_image(180, 180);
        let landmarks = synthetic_landmarks((90.0, 90.0), 40.0, -15.0);
        let stages = ExtractionStages::new(&ExtractorConfig::new());
        let (face, info) = stages.run(&image, landmarks).unwrap();

        assert_eq!((face.rows(), face.cols()), (info.size_fine, info.size_fine));
        assert_eq!(info.mask_fine.size().unwrap(), face.size().unwrap());
        assert_eq!(info.image_unmasked.size().unwrap(), face.size().unwrap());
        assert_eq!((info.image_cropped.rows(), info.mask.rows()), (info.size_coarse, info.size_coarse));
        assert_eq!(info.mask.typ(), CV_8UC1);
        assert_eq!(info.mask_fine.typ(), CV_8UC1);
        assert!((info.rotation.angle + 15.0).abs() < 1e-9);

        let (bb, off) = (info.bounding_box_coarse, info.offsets_coarse);
        assert_eq!(info.origin_coarse, (bb.left - off.left, bb.top - off.top));
        let (bb, off) = (info.bounding_box_fine, info.offsets_fine);
        assert_eq!(info.origin_fine, (bb.left - off.left, bb.top - off.top));

        let size = info.size_fine as f64;
        assert!(info.landmarks.points().iter().all(|p| (0.0..size).contains(&p.x) && (0.0..size).contains(&p.y)));

        // The face is the masked copy of the unmasked crop.
        let c = info.landmarks.centroid();
        let (cy, cx) = (c.y.round() as i32, c.x.round() as i32);
        assert_eq!(*info.mask_fine.at_2d::<u8>(cy, cx).unwrap(), 1);
        assert_eq!(face.at_2d::<Vec3b>(cy, cx).unwrap(), info.image_unmasked.at_2d::<Vec3b>(cy, cx).unwrap());
    }

    #[test]
    fn test_soft_mask_is_carried_as_float() {
        let image = gradient_image(150, 150);
        let landmarks = synthetic_landmarks((75.0, 75.0), 35.0, 8.0);
        let config = ExtractorConfig { sharp_edge: false, ..ExtractorConfig::new() };
        let (_, info) = ExtractionStages::new(&config).run(&image, landmarks).unwrap();

        assert_eq!(info.mask.typ(), CV_32FC1);
        assert_eq!(info.mask_fine.typ(), CV_32FC1);
    }

    #[test]
    fn test_no_face_is_not_an_error() {
        let source = ScriptedLandmarkSource::new(vec![None]);
        let mut extractor = FaceExtractor::new(source, &ExtractorConfig::new());
        assert!(extractor.extract(&solid_image(50, 50, [1, 2, 3])).unwrap().is_none());
    }

    #[test]
    fn test_video_mode_reuses_previous_face() {
        let landmarks = synthetic_landmarks((60.0, 60.0), 20.0, 0.0);
        let source = ScriptedLandmarkSource::new(vec![Some(landmarks), None, None]);
        let config = ExtractorConfig { video_mode: true, ..ExtractorConfig::new() };
        let mut extractor = FaceExtractor::new(source, &config);
        let image = gradient_image(120, 120);

        let (_, detected) = extractor.extract(&image).unwrap().unwrap();
        let (_, estimated) = extractor.extract(&image).unwrap().unwrap();
        assert!(estimated.size_coarse > detected.size_coarse);

        extractor.reset();
        assert!(extractor.extract(&image).unwrap().is_none());
    }

    #[test]
    fn test_degenerate_landmarks_are_reported() {
        let landmarks = LandmarkSet::from_points(vec![Point2::new(20.0, 20.0); 72]).unwrap();
        let stages = ExtractionStages::new(&ExtractorConfig::new());
        let err = stages.run(&solid_image(40, 40, [9, 9, 9]), landmarks).unwrap_err();

        assert_eq!(
            err.downcast_ref::<ExtractionError>(),
            Some(&ExtractionError::DegenerateGeometry { stage: "coarse" })
        );
    }

    #[tokio::test]
    async fn test_batch_keeps_input_order() {
        let landmarks = synthetic_landmarks((50.0, 50.0), 20.0, 5.0);
        let source = Arc::new(StaticLandmarkSource::new(Some(landmarks)));
        let images: Vec<_> = (0..6u8).map(|i| solid_image(100, 100, [10 * i + 1, 2, 3])).collect();
        let config = ExtractorConfig { video_mode: true, ..ExtractorConfig::new() };

        let results = extract_batch(source, &config, images.clone()).await.unwrap();
        assert_eq!(results.len(), images.len());
        for (image, result) in images.iter().zip(&results) {
            let (_, info) = result.as_ref().unwrap();
            assert!(mats_equal(&info.image_original, image));
        }

        let empty = Arc::new(StaticLandmarkSource::new(None));
        let results = extract_batch(empty, &ExtractorConfig::new(), images).await.unwrap();
        assert!(results.iter().all(Option::is_none));
    }
}

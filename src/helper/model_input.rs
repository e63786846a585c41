use anyhow::Error;
use ndarray::{Array1, Array3, ArrayD, Axis, IxDyn};
use opencv::core::{Mat, MatTraitConst, Size, CV_8UC3};
use opencv::imgproc::{resize, INTER_CUBIC};

use crate::config::config::{ModelInputKind, OutputRange};
use crate::pipeline::extractor::ExtractionInformation;
use crate::utils::image::{array3_to_mat, mat_to_array3};

const HISTOGRAM_BINS: usize = 256;

/// build_model_input builds the tensor the external model consumes for one extracted face.
///
/// Landmark based inputs are flat `[1, n]` vectors starting with the 144
/// landmark coordinates normalized by `size_fine`. `Image` yields
/// `[1, 3, H, W]`, or a flat vector when `annotations` are appended.
///
/// # Arguments
/// * `kind` - ModelInputKind
/// * `face` - extracted face
/// * `information` - &ExtractionInformation of the face
/// * `target_size` - `(width, height)` the model expects
/// * `annotations` - optional attribute vector appended to the input
///
/// # Returns
/// * `Result<ArrayD<f32>, Error>`
pub fn build_model_input(
    kind: ModelInputKind,
    face: &Mat,
    information: &ExtractionInformation,
    target_size: (i32, i32),
    annotations: Option<&Array1<f32>>,
) -> Result<ArrayD<f32>, Error> {
    if face.typ() != CV_8UC3 {
        return Err(Error::msg(format!("model input needs an 8-bit RGB face, got type {}", face.typ())));
    }

    let mut features: Vec<f32> = match kind {
        ModelInputKind::Image => {
            let chw = image_to_chw(&resize_face(face, target_size)?)?;
            if annotations.is_none() {
                return Ok(chw.insert_axis(Axis(0)).into_dyn());
            }
            chw.iter().copied().collect()
        }
        ModelInputKind::Landmarks => information.landmarks.normalized(information.size_fine).to_vec(),
        ModelInputKind::LandmarksLowRes { resolution } => {
            let resized = resize_face(face, target_size)?;
            let low_res = resize_face(&resized, (resolution, resolution))?;
            let mut features = information.landmarks.normalized(information.size_fine).to_vec();
            features.extend(image_to_chw(&low_res)?.iter());
            features
        }
        ModelInputKind::LandmarksHistogram => {
            let resized = resize_face(face, target_size)?;
            let mut features = information.landmarks.normalized(information.size_fine).to_vec();
            features.extend(color_histogram(&resized)?);
            features
        }
    };

    if let Some(annotations) = annotations {
        features.extend(annotations.iter());
    }
    let length = features.len();
    Ok(ArrayD::from_shape_vec(IxDyn(&[1, length]), features)?)
}

/// model_output_to_mat converts a CHW model output back into an 8-bit RGB image.
///
/// # Arguments
/// * `output` - &Array3<f32> of shape `[3, H, W]`
/// * `range` - value range of the model output
///
/// # Returns
/// * `Result<Mat, Error>`
pub fn model_output_to_mat(output: &Array3<f32>, range: OutputRange) -> Result<Mat, Error> {
    if output.dim().0 != 3 {
        return Err(Error::msg(format!("model output needs 3 channels, got shape {:?}", output.dim())));
    }
    let scale = match range {
        OutputRange::Unit => 255.0,
        OutputRange::Byte => 1.0,
    };
    let hwc = output
        .view()
        .permuted_axes([1, 2, 0])
        .mapv(|v| (v * scale).round().clamp(0.0, 255.0) as u8);
    array3_to_mat(&hwc)
}

fn resize_face(face: &Mat, (width, height): (i32, i32)) -> Result<Mat, Error> {
    if width <= 0 || height <= 0 {
        return Err(Error::msg(format!("invalid model input size {width}x{height}")));
    }
    let mut resized = Mat::default();
    resize(face, &mut resized, Size::new(width, height), 0.0, 0.0, INTER_CUBIC)?;
    Ok(resized)
}

/// CHW float copy scaled to `[0, 1]`.
fn image_to_chw(image: &Mat) -> Result<Array3<f32>, Error> {
    Ok(mat_to_array3(image)?
        .permuted_axes([2, 0, 1])
        .mapv(|v| v as f32 / 255.0))
}

/// Per-channel 256-bin histograms, concatenated and normalized to sum to one.
fn color_histogram(image: &Mat) -> Result<Vec<f32>, Error> {
    let pixels = mat_to_array3(image)?;
    let channels = pixels.dim().2;
    let mut histogram = vec![0u32; channels * HISTOGRAM_BINS];
    for pixel in pixels.rows() {
        for (channel, &value) in pixel.iter().enumerate() {
            histogram[channel * HISTOGRAM_BINS + value as usize] += 1;
        }
    }

    let total = pixels.len() as f32;
    Ok(histogram.into_iter().map(|count| count as f32 / total).collect())
}

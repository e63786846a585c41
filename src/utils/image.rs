use std::path::Path;

use anyhow::Error;
use ndarray::Array3;
use opencv::core::{
    Mat, MatTraitConst, MatTraitConstManual, MatTraitManual, Point, Rect, Scalar, Vector,
    CV_32F, CV_32FC1, CV_64FC1, CV_8U, CV_8UC1, CV_8UC3, CV_8UC4,
};
use opencv::imgcodecs::{imdecode, imwrite, IMREAD_COLOR};
use opencv::imgproc::{circle, cvt_color, polylines, COLOR_BGR2RGB, COLOR_RGB2BGR, FILLED, LINE_8};

use crate::error::ExtractionError;
use crate::utils::coordinate::{BoundingBox, FacialFeature, LandmarkSet, Offsets};

/// Blend weight representation of a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskKind {
    /// `CV_8UC1`, non-zero pixels select the face.
    Sharp,
    /// `CV_32FC1` or `CV_64FC1`, per-pixel weights in `[0, 1]`.
    Soft,
}

pub fn mask_kind(mask: &Mat) -> Result<MaskKind, ExtractionError> {
    match mask.typ() {
        CV_8UC1 => Ok(MaskKind::Sharp),
        CV_32FC1 | CV_64FC1 => Ok(MaskKind::Soft),
        other => Err(ExtractionError::InvalidMaskType(other)),
    }
}

/// Decodes encoded image bytes into an RGB matrix.
pub fn decode_image(im_bytes: &[u8]) -> Result<Mat, Error> {
    let buffer = Vector::<u8>::from_slice(im_bytes);
    let img_as_arr_bgr = imdecode(&buffer, IMREAD_COLOR)?;
    if img_as_arr_bgr.empty() {
        return Err(Error::msg("image bytes could not be decoded"));
    }

    let mut img_as_arr_rgb = Mat::default();
    cvt_color(&img_as_arr_bgr, &mut img_as_arr_rgb, COLOR_BGR2RGB, 0)?;
    Ok(img_as_arr_rgb)
}

/// Writes an RGB (or single channel) matrix to `path`.
pub fn write_image(path: &Path, img: &Mat) -> Result<(), Error> {
    let mut out = Mat::default();
    if img.channels() == 3 {
        cvt_color(img, &mut out, COLOR_RGB2BGR, 0)?;
    } else {
        out = img.try_clone()?;
    }

    let filename = path.to_string_lossy();
    if !imwrite(&filename, &out, &Vector::new())? {
        return Err(Error::msg(format!("failed to write image to {filename}")));
    }
    Ok(())
}

/// Scales a mask of either kind to a viewable 0-255 image.
pub fn mask_to_image(mask: &Mat) -> Result<Mat, Error> {
    mask_kind(mask)?;
    let mut out = Mat::default();
    mask.convert_to(&mut out, CV_8U, 255.0, 0.0)?;
    Ok(out)
}

/// Rounds landmarks to integer pixel positions.
pub fn landmarks_to_vector_of_point(points: &[nalgebra::Point2<f64>]) -> Vector<Point> {
    points
        .iter()
        .map(|p| Point::new(p.x.round() as i32, p.y.round() as i32))
        .collect()
}

/// Allocates a `size x size` zero image of `typ` and copies the valid
/// `bounding_box` region of `image` to the position given by `offsets`.
/// Everything outside that region stays zero.
pub fn crop_with_padding(image: &Mat, bounding_box: &BoundingBox, offsets: &Offsets, size: i32) -> Result<Mat, Error> {
    let mut cropped = Mat::new_rows_cols_with_default(size, size, image.typ(), Scalar::all(0.0))?;
    paste_region(&mut cropped, offsets, image, bounding_box)?;
    Ok(cropped)
}

/// Copies the `from` rectangle of `src` into the `to` rectangle of `dst`.
/// Both rectangles must have the same extent; empty rectangles are a no-op.
pub fn paste_region(dst: &mut Mat, to: &BoundingBox, src: &Mat, from: &BoundingBox) -> Result<(), Error> {
    if from.is_empty() {
        return Ok(());
    }
    if from.width() != to.width() || from.height() != to.height() {
        return Err(Error::msg(format!("cannot paste a {from:?} region into {to:?}")));
    }

    let src_roi = Mat::roi(src, Rect::new(from.left, from.top, from.width(), from.height()))?;
    let mut dst_roi = Mat::roi_mut(dst, Rect::new(to.left, to.top, to.width(), to.height()))?;
    src_roi.copy_to(&mut dst_roi)?;
    Ok(())
}

/// Converts any supported mask into contiguous `f32` weights.
fn mask_weights(mask: &Mat) -> Result<(MaskKind, Mat), Error> {
    let kind = mask_kind(mask)?;
    let mut weights = Mat::default();
    mask.convert_to(&mut weights, CV_32F, 1.0, 0.0)?;
    Ok((kind, weights))
}

fn check_same_size(image: &Mat, mask: &Mat) -> Result<(), Error> {
    if image.size()? != mask.size()? {
        return Err(Error::msg(format!(
            "mask size {:?} does not match image size {:?}",
            mask.size()?,
            image.size()?
        )));
    }
    Ok(())
}

/// Multiplies every channel of `image` with `mask` and casts back to 8 bit.
pub fn apply_mask(image: &Mat, mask: &Mat) -> Result<Mat, Error> {
    check_same_size(image, mask)?;
    let (_, weights) = mask_weights(mask)?;
    let channels = image.channels() as usize;

    let mut masked = image.try_clone()?;
    let weights = weights.data_typed::<f32>()?;
    for (pixel, &weight) in masked.data_bytes_mut()?.chunks_exact_mut(channels).zip(weights) {
        for value in pixel.iter_mut() {
            *value = (weight * *value as f32).round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(masked)
}

/// Merges `face` onto `image` where `mask` marks the face.
///
/// Sharp masks select pixels, soft masks blend
/// `mask * face + (1 - mask) * image`. Both images must share size and type.
pub fn blend_with_mask(face: &Mat, image: &Mat, mask: &Mat) -> Result<Mat, Error> {
    check_same_size(image, mask)?;
    check_same_size(image, face)?;
    if face.typ() != image.typ() {
        return Err(Error::msg(format!(
            "face type {} does not match image type {}",
            face.typ(),
            image.typ()
        )));
    }
    let (kind, weights) = mask_weights(mask)?;
    let channels = image.channels() as usize;

    let face = face.try_clone()?;
    let mut merged = image.try_clone()?;
    let weights = weights.data_typed::<f32>()?;
    let face_pixels = face.data_bytes()?.chunks_exact(channels);
    let merged_pixels = merged.data_bytes_mut()?.chunks_exact_mut(channels);

    for ((out, src), &weight) in merged_pixels.zip(face_pixels).zip(weights) {
        match kind {
            MaskKind::Sharp => {
                if weight != 0.0 {
                    out.copy_from_slice(src);
                }
            }
            MaskKind::Soft => {
                for (o, s) in out.iter_mut().zip(src) {
                    let value = weight * *s as f32 + (1.0 - weight) * *o as f32;
                    *o = value.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
    Ok(merged)
}

/// HWC copy of an 8-bit image.
pub fn mat_to_array3(img: &Mat) -> Result<Array3<u8>, Error> {
    let contiguous = img.try_clone()?;
    let shape = (img.rows() as usize, img.cols() as usize, img.channels() as usize);
    Ok(Array3::from_shape_vec(shape, contiguous.data_bytes()?.to_vec())?)
}

/// Builds an 8-bit image from an HWC array with 1, 3 or 4 channels.
pub fn array3_to_mat(array: &Array3<u8>) -> Result<Mat, Error> {
    let (rows, cols, channels) = array.dim();
    let typ = match channels {
        1 => CV_8UC1,
        3 => CV_8UC3,
        4 => CV_8UC4,
        _ => return Err(Error::msg(format!("unsupported channel count {channels}"))),
    };

    let mut img = Mat::new_rows_cols_with_default(rows as i32, cols as i32, typ, Scalar::all(0.0))?;
    for (dst, src) in img.data_bytes_mut()?.iter_mut().zip(array.iter()) {
        *dst = *src;
    }
    Ok(img)
}

/// Draws every landmark as a dot and connects each feature with a polyline.
pub fn draw_landmarks(image: &Mat, landmarks: &LandmarkSet) -> Result<Mat, Error> {
    let mut canvas = image.try_clone()?;
    let green = Scalar::new(0.0, 255.0, 0.0, 0.0);
    let radius = 3;

    for feature in FacialFeature::ALL {
        let points = landmarks_to_vector_of_point(landmarks.feature(feature));
        for point in points.iter() {
            circle(&mut canvas, point, radius, green, FILLED, LINE_8, 0)?;
        }
        let mut contour = Vector::<Vector<Point>>::new();
        contour.push(points);
        polylines(&mut canvas, &contour, false, green, radius, LINE_8, 0)?;
    }
    Ok(canvas)
}

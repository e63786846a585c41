use anyhow::Error;
use log::debug;
use opencv::core::{Mat, MatTraitConst, Scalar, Size};
use opencv::imgproc::{resize, INTER_CUBIC, INTER_LINEAR, INTER_NEAREST};

use crate::modules::face_aligner::FaceAligner;
use crate::pipeline::extractor::ExtractionInformation;
use crate::utils::image::{blend_with_mask, mask_kind, paste_region, MaskKind};

/// merge_face_image merges a face onto an image where the mask marks the face.
///
/// Sharp masks select pixels, soft masks blend linearly; any other mask
/// type is an `InvalidMaskType` error.
///
/// # Arguments
/// * `face` - synthesized face, resized (bicubic) to the image size if needed
/// * `image` - unmasked image in the same frame as the mask
/// * `mask` - `CV_8UC1`, `CV_32FC1` or `CV_64FC1`
///
/// # Returns
/// * `Result<Mat, Error>`
pub fn merge_face_image(face: &Mat, image: &Mat, mask: &Mat) -> Result<Mat, Error> {
    mask_kind(mask)?;
    let face = fit_to(face, image.size()?)?;
    blend_with_mask(&face, image, mask)
}

/// compose_fine merges a synthesized face in the fine crop frame.
///
/// # Arguments
/// * `synthesized` - face produced by the model
/// * `information` - &ExtractionInformation of the extracted face
///
/// # Returns
/// * `Result<Mat, Error>` - image of `size_fine x size_fine`
pub fn compose_fine(synthesized: &Mat, information: &ExtractionInformation) -> Result<Mat, Error> {
    merge_face_image(synthesized, &information.image_unmasked, &information.mask_fine)
}

/// compose_into_scene puts a synthesized face back into the full original image.
///
/// The face and the fine mask go back into the aligned coarse crop, the
/// alignment is undone for both, and the face is blended once with the
/// unmasked coarse crop. That crop is pasted into a copy of the original
/// image, so pixels outside the mask keep their original values.
///
/// # Arguments
/// * `synthesized` - face produced by the model
/// * `information` - &ExtractionInformation of the extracted face
///
/// # Returns
/// * `Result<Mat, Error>` - image of the size of `image_original`
pub fn compose_into_scene(synthesized: &Mat, information: &ExtractionInformation) -> Result<Mat, Error> {
    let mask_fine = &information.mask_fine;
    let mask_interpolation = match mask_kind(mask_fine)? {
        MaskKind::Sharp => INTER_NEAREST,
        MaskKind::Soft => INTER_LINEAR,
    };
    let face_fine = fit_to(synthesized, Size::new(information.size_fine, information.size_fine))?;
    let rotation = &information.rotation;

    let mut canvas = FaceAligner::apply_rotation(&information.image_cropped, rotation, INTER_LINEAR)?;
    paste_region(&mut canvas, &information.bounding_box_fine, &face_fine, &information.offsets_fine)?;

    let mut mask_canvas = Mat::new_rows_cols_with_default(
        information.size_coarse,
        information.size_coarse,
        mask_fine.typ(),
        Scalar::all(0.0),
    )?;
    paste_region(&mut mask_canvas, &information.bounding_box_fine, mask_fine, &information.offsets_fine)?;

    let face_coarse = FaceAligner::revert_rotation(&canvas, rotation, INTER_LINEAR)?;
    let mask_coarse = FaceAligner::revert_rotation(&mask_canvas, rotation, mask_interpolation)?;
    let merged_coarse = blend_with_mask(&face_coarse, &information.image_cropped, &mask_coarse)?;

    let mut scene = information.image_original.try_clone()?;
    paste_region(
        &mut scene,
        &information.bounding_box_coarse,
        &merged_coarse,
        &information.offsets_coarse,
    )?;
    debug!("composed face into scene at {:?}", information.bounding_box_coarse);
    Ok(scene)
}

fn fit_to(face: &Mat, size: Size) -> Result<Mat, Error> {
    if face.size()? == size {
        return Ok(face.try_clone()?);
    }
    let mut resized = Mat::default();
    resize(face, &mut resized, size, 0.0, 0.0, INTER_CUBIC)?;
    Ok(resized)
}

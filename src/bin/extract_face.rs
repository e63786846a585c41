//! Extracts the face of one image and writes the artifacts a model would consume.
//!
//! Usage:
//!   extract_face <image> --landmarks face.json -o out/
//!   extract_face <image> --landmarks face.json --config anonymizer.json --draw-landmarks --dump-model-input

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Error};
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;
use serde::Serialize;

use rs_face_anonymizer::config::config::AnonymizerConfig;
use rs_face_anonymizer::helper::model_input::build_model_input;
use rs_face_anonymizer::modules::landmark_source::StaticLandmarkSource;
use rs_face_anonymizer::pipeline::extractor::{ExtractionInformation, FaceExtractor};
use rs_face_anonymizer::utils::coordinate::{BoundingBox, NamedLandmarks, Rotation};
use rs_face_anonymizer::utils::image::{decode_image, draw_landmarks, mask_to_image, write_image};

#[derive(Parser, Debug)]
#[command(name = "extract_face")]
#[command(author, version, about = "Face extraction for anonymization models", long_about = None)]
struct Args {
    /// Input image file
    #[arg(required = true)]
    image: PathBuf,

    /// Landmarks of the face as JSON, `{"chin": [[x, y], ...], ...}`
    #[arg(short, long)]
    landmarks: PathBuf,

    /// Anonymizer configuration as JSON (defaults otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = "extracted")]
    output: PathBuf,

    /// Also write the face with the landmarks drawn on it
    #[arg(long)]
    draw_landmarks: bool,

    /// Also write the model input tensor as .npy
    #[arg(long)]
    dump_model_input: bool,
}

/// Geometry part of the extraction result.
#[derive(Serialize)]
struct Geometry {
    bounding_box_coarse: BoundingBox,
    offsets_coarse: BoundingBox,
    size_coarse: i32,
    origin_coarse: (i32, i32),
    rotation: Rotation,
    bounding_box_fine: BoundingBox,
    offsets_fine: BoundingBox,
    size_fine: i32,
    origin_fine: (i32, i32),
    landmarks: NamedLandmarks,
}

impl From<&ExtractionInformation> for Geometry {
    fn from(information: &ExtractionInformation) -> Self {
        Geometry {
            bounding_box_coarse: information.bounding_box_coarse,
            offsets_coarse: information.offsets_coarse,
            size_coarse: information.size_coarse,
            origin_coarse: information.origin_coarse,
            rotation: information.rotation,
            bounding_box_fine: information.bounding_box_fine,
            offsets_fine: information.offsets_fine,
            size_fine: information.size_fine,
            origin_fine: information.origin_fine,
            landmarks: information.landmarks.to_named(),
        }
    }
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AnonymizerConfig::load(path)?,
        None => AnonymizerConfig::new(),
    };
    let bytes = fs::read(&args.image).with_context(|| format!("cannot read {}", args.image.display()))?;
    let image = decode_image(&bytes)?;

    let source = StaticLandmarkSource::from_json_file(&args.landmarks)?;
    let mut extractor = FaceExtractor::new(source, &config.extractor);
    let Some((face, information)) = extractor.extract(&image)? else {
        println!("no face found in {}", args.image.display());
        return Ok(());
    };

    fs::create_dir_all(&args.output)?;
    write_image(&args.output.join("face.png"), &face)?;
    write_image(&args.output.join("mask.png"), &mask_to_image(&information.mask_fine)?)?;
    fs::write(
        args.output.join("geometry.json"),
        serde_json::to_string_pretty(&Geometry::from(&information))?,
    )?;

    if args.draw_landmarks {
        let overlay = draw_landmarks(&information.image_unmasked, &information.landmarks)?;
        write_image(&args.output.join("landmarks.png"), &overlay)?;
    }

    if args.dump_model_input {
        let input = build_model_input(config.model_input, &face, &information, config.image_size, None)?;
        write_npy(args.output.join("model_input.npy"), &input)?;
        info!("model input of shape {:?}", input.shape());
    }

    println!(
        "extracted a {0}x{0} face, rotated by {1:.2} degrees, into {2}",
        information.size_fine,
        information.rotation.angle,
        args.output.display()
    );
    Ok(())
}

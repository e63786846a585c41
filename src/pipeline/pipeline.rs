use anyhow::Error;
use log::debug;
use ndarray::{Array1, Array3, ArrayD};
use opencv::core::Mat;

use crate::config::config::{AnonymizerConfig, ModelInputKind, OutputRange};
use crate::helper::compositor::compose_into_scene;
use crate::helper::model_input::{build_model_input, model_output_to_mat};
use crate::modules::landmark_source::LandmarkSource;
use crate::pipeline::extractor::FaceExtractor;

/// The external face generation model.
pub trait FaceSynthesizer {
    /// Maps a model input tensor to a CHW image.
    fn synthesize(&self, input: &ArrayD<f32>) -> Result<Array3<f32>, Error>;
}

pub struct AnonymizationPipeline<S, M> {
    extractor: FaceExtractor<S>,
    synthesizer: M,
    model_input: ModelInputKind,
    image_size: (i32, i32),
    output_range: OutputRange,
    annotations: Option<Array1<f32>>,
}

impl<S: LandmarkSource, M: FaceSynthesizer> AnonymizationPipeline<S, M> {

    /// new initializes new instance of the anonymization pipeline.
    ///
    /// # Arguments
    /// * `source` - landmark detector
    /// * `synthesizer` - face generation model
    /// * `config` - &AnonymizerConfig
    ///
    /// # Returns
    /// * `Self`
    pub fn new(source: S, synthesizer: M, config: &AnonymizerConfig) -> Self {
        AnonymizationPipeline {
            extractor: FaceExtractor::new(source, &config.extractor),
            synthesizer,
            model_input: config.model_input,
            image_size: config.image_size,
            output_range: config.output_range,
            annotations: None,
        }
    }

    /// with_annotations appends a fixed attribute vector to every model input.
    pub fn with_annotations(mut self, annotations: Array1<f32>) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// anonymize replaces the face in the image with a synthesized one.
    ///
    /// # Arguments
    /// * `image` - RGB OpenCV matrix
    ///
    /// # Returns
    /// * `Result<Option<Mat>, Error>` - `None` when the image has no face
    pub fn anonymize(&mut self, image: &Mat) -> Result<Option<Mat>, Error> {
        let Some((face, information)) = self.extractor.extract(image)? else {
            return Ok(None);
        };

        let input = build_model_input(
            self.model_input,
            &face,
            &information,
            self.image_size,
            self.annotations.as_ref(),
        )?;
        debug!("model input {:?} of shape {:?}", self.model_input, input.shape());

        let output = self.synthesizer.synthesize(&input)?;
        let synthesized = model_output_to_mat(&output, self.output_range)?;
        compose_into_scene(&synthesized, &information).map(Some)
    }
}

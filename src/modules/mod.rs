pub mod face_aligner;
pub mod face_cropper;
pub mod face_masker;
pub mod landmark_source;

pub mod compositor;
pub mod model_input;

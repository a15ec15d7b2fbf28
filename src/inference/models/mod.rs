pub mod model;
pub mod whisper;

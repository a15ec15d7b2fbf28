pub mod audio_pipeline;
pub mod convert;
pub mod engine_chain;
pub mod engines;
pub mod language;
pub mod model_cache;
pub mod models;
pub mod pcm_decode;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub mod decoder;
pub mod image_gen;
pub mod orchestrator;
pub mod registry;
pub mod source_image;
pub mod storage;
pub mod synth;
pub mod volcengine;

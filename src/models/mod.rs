pub mod artifact;
pub mod generation;
pub mod image;
pub mod job;

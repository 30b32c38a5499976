mod build;
mod build_pipeline;
mod check;

pub use build::{BuildArgs, build};
pub use check::check;

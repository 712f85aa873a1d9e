pub mod jobs;
pub mod quality;
pub mod video;

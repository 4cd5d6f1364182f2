pub mod services;

pub use services::{upload_profile_image, CompressionInfo, MAX_UPLOAD_BYTES};

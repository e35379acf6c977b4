pub mod health;
pub mod images;
pub mod metrics;

pub use health::{health_check, readiness_check};
pub use images::{generate_images, stream_images};
pub use metrics::metrics;

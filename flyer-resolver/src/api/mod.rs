//! HTTP API handlers for flyer-resolver
//!
//! REST endpoints for projects, products and the certified bank, plus SSE

pub mod certified_images;
pub mod health;
pub mod projects;
pub mod settings;
pub mod sse;

pub use certified_images::certified_image_routes;
pub use health::health_routes;
pub use projects::project_routes;
pub use settings::settings_routes;
pub use sse::event_stream;

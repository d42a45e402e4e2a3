pub mod api;
pub mod attendance;
pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod messaging;
pub mod model;
pub mod queue;
pub mod session;
pub mod settings;
pub mod store;
pub mod turns;
pub mod validation;

pub use error::CoreError;
pub use session::Session;

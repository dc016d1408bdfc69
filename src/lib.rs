pub mod app_state;
pub mod config;
pub mod error;
pub mod io_struct;
pub mod sanitizer;
pub mod server;
pub mod streaming;
pub mod upstream;

pub use app_state::AppState;
pub use config::GatewayConfig;
pub use error::ApiError;

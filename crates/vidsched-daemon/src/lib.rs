pub mod error;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod logging;

pub use error::{ServiceError, StartupError};
pub use lifecycle::{load_config, Coordinator, Endpoint, Host, Phase};

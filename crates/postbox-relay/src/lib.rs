pub mod config;
pub mod error;
pub mod routes;
pub mod service;

pub use config::RelayConfig;
pub use error::RelayError;
pub use routes::router;
pub use service::RelayService;

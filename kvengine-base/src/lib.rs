mod bitmap256;
mod config;
mod error;

pub use bitmap256::Bitmap256;
pub use config::EngineConfig;
pub use error::{err, err_kind, Error, ErrorKind, Result};

mod blob_routes;
pub mod config;
mod http_layers;
mod internal_routes;
pub mod metrics;
pub mod server;
mod signature_gate;
pub mod state;
mod stream;

pub use blob_routes::{parse_flag, IMAGE_CACHE_CONTROL};
pub use config::ServerConfig;
pub use http_layers::*;
pub use internal_routes::FILES_FORM_FIELD;
pub use server::{make_app, run_server};
pub use state::ServerState;
pub use stream::ByteRange;

pub mod bind;
pub mod server;
pub mod types;

pub use bind::{bind_listener, project_name, runtime_dir, socket_path_for, socket_path_in, RUNTIME_DIR_ENV};
pub use server::{accepts_directory, IngestServer, ServerConfig, MAX_PAYLOAD};
pub use types::Ack;

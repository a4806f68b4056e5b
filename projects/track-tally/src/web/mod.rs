pub mod api;
pub mod runs;
pub mod server;

pub mod routes;
pub mod server;
pub mod ws;

pub use server::start_dashboard_server;

pub mod handlers;
pub mod routes;
pub mod server;
pub mod ws;

pub use handlers::AppState;
pub use server::ApiServer;

pub mod protocol;
pub mod routes;
pub mod ws;

pub mod auth;
pub mod client;
pub mod order;
pub mod session;

pub mod app;
pub mod client_ip;
pub mod handlers;
pub mod ip_restriction;
pub mod state;

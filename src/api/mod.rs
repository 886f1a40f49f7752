pub mod auth;
pub mod error;
pub mod handler_utils;
pub mod routes;
pub mod server;
pub mod tutor;

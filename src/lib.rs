pub mod activity;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod notifications;
pub mod routes;
pub mod schema;
pub mod sla;
pub mod state;
pub mod utils;

pub mod app_error;
pub mod config;
pub mod db;
pub mod models;
pub mod realtime;
pub mod redis;
pub mod shortener;
pub mod web;

pub use crate::config::AppConfig;

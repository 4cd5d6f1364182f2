pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod health;
pub mod images;
pub mod mail;
pub mod state;
pub mod storage;
pub mod users;
pub mod validation;

#[cfg(test)]
mod testing;

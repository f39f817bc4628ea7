//! Samvad: a REST backend for document chat, OCR and translation over a
//! document store.

pub mod config;
pub mod error;
pub mod ml;
pub mod models;
pub mod routes;
pub mod service;
pub mod session;
pub mod storage;
pub mod user_models;
pub mod user_storage;

pub use routes::{create_router, AppState};

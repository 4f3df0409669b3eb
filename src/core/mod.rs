//! Core functionality for documents, storage, and configuration

pub mod config;
pub mod document;
pub mod storage;
pub mod store;

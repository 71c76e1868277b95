// Library exports for snapshare
// This allows integration tests and external code to use snapshare modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod routes;
pub mod social;
pub mod state;
pub mod storage;

//! Shared backend infrastructure: a process-wide PostgreSQL pool and a
//! bearer-token auth gate backed by Firebase ID token verification.

pub mod config;
pub mod db;
pub mod logging;
pub mod routes;
pub mod services;
pub mod state;

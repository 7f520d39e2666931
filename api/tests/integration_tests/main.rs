//! Integration tests for the Logsift API.
//!
//! These tests drive the full router, with authentication, admission control
//! and the query pipeline wired together over an in-process store.

mod auth_tests;
mod common;
mod health_tests;
mod logs_tests;
mod query_tests;

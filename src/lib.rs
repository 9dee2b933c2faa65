//! Library crate for port-scan-rs: a bounded-concurrency TCP port scanner and the
//! validation, reporting, and HTTP layers around it.
pub mod aggregate;
pub mod report;
pub mod scanner;
pub mod server;
pub mod services;
pub mod types;
pub mod validate;

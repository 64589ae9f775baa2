pub mod api;
pub mod app;
pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
pub mod ics;
pub mod parser;
pub mod rate_limit;
pub mod reconcile;
pub mod schedule;
pub mod storage;
pub mod timezone;
pub mod weekday;

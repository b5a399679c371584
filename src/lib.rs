pub mod api;
pub mod app;
pub mod artifacts;
pub mod config;
pub mod humanize;
pub mod ledger;
pub mod observability;
pub mod queue;
pub mod quota;
pub mod scheduler;
pub mod storage;
pub mod sweeper;
pub mod task;
pub mod worker;

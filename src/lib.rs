//! Link survey: periodic throughput, interface-rate and position logging
//!
//! Every iteration runs an iperf3 download test, samples the byte counters of
//! each configured interface and reads one GPS fix, all concurrently, then
//! appends a single row to a CSV log.

pub mod cli;
pub mod collectors;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod storage;

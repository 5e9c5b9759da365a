//! Scenario-based tests for checkrun

mod helpers;

mod caching;
mod fail_fast;
mod history;
mod provisioning;
mod triggers;

//! Entity Verification Jobs
//!
//! Background verification of business entity registrations (tax numbers,
//! commercial registrations) against country-specific format rules. Jobs are
//! persisted with a TTL, queued for a periodic worker, and their lifecycle is
//! broadcast over pub/sub for live status updates.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;

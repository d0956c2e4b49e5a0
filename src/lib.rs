//! Task Planner Library
//!
//! This module exports the core components for testing and integration.

pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod notify;
pub mod recurrence;
pub mod types;
pub mod views;
pub mod web;

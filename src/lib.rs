//! Quillpress - An admin-authenticated multilingual blog CMS
//!
//! This library provides the core functionality for the Quillpress service:
//! signed admin sessions, posts with a translation workflow, a newsletter,
//! generated landing pages and an analytics report.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

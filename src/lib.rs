//! Network topology editor core and its persistence service.
//!
//! The editor side (`graph`, `store`, `render`, `controller`, `sync`,
//! `editor`) is transport-agnostic; `handlers` and `state` implement the
//! REST service the sync gateway talks to.

pub mod anomaly;
pub mod controller;
pub mod data;
pub mod editor;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod models;
pub mod notice;
pub mod ports;
pub mod render;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod sync;
pub mod zscore;

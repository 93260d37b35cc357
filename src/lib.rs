//! labsync: reconciles diagnostic test orders with an external scheduling
//! service and drives results through a reporting state machine.

pub mod api;
pub mod barcode;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod models;
pub mod scheduling;

#[cfg(test)]
pub mod testutil;

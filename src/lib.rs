//! Offline-first sync engine for a multi-tenant restaurant inventory
//! backend: a durable local queue of stock movements, optimistic stock
//! projection, and ordered replay against the remote store on reconnect.

pub mod config;
pub mod db;
pub mod model;
pub mod net;
pub mod remote;
pub mod sync;

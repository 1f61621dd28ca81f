//! A minimal signalling relay and the client transport that talks to it.
//!
//! Clients register an endpoint, dial each other by endpoint and exchange
//! opaque payloads over routes the relay keeps only while both ends are
//! connected.

pub mod client;
pub mod frame;
pub mod registry;
pub mod server;

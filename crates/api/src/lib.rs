//! HTTP API: inbound payment events and the campaign query/control surface.

pub mod app;

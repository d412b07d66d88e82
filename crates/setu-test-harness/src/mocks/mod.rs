//! Mock servers.
//!
//! `network` wraps wiremock for well-formed HTTP; `faulty` speaks raw TCP to
//! produce failures wiremock cannot (resets, stalls mid-body).

pub mod faulty;
pub mod network;

pub use faulty::*;
pub use network::*;

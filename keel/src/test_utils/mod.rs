//! Test fakes for the protocol traits.
//!
//! Enabled with the `test-utils` feature. Downstream crates use these
//! instead of ad-hoc per-test mocks: an echoing model backend, a few
//! canned tools, and a recording tool gateway.

mod echo_model;
mod recording_gateway;
mod tools;

pub use echo_model::EchoModel;
pub use recording_gateway::RecordingGateway;
pub use tools::{EchoTool, FailTool, SleepTool};

//! Test support for apitap
//!
//! `MockServer` stands in for either side of the proxy in integration
//! tests: as the origin it serves canned responses, as the telemetry
//! collector it records every payload it receives.

pub mod expectation;
pub mod matcher;
pub mod server;

pub use expectation::{Expectation, MockResponse, Times};
pub use matcher::RequestMatcher;
pub use server::{ExpectationBuilder, MockServer, RecordedRequest};

// Library exports for the CLI, integration tests and any UI shell driving the flow

pub mod analytics;
pub mod client;
pub mod config;
pub mod progress;
pub mod stage_store;
pub mod stages;
pub mod template;

// Re-export the flow entry point at crate root for easier access
pub use stages::Workflow;

// Test support (unit tests, or integration tests with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

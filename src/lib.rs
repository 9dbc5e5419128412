pub mod batch;
pub mod branch;
pub mod config;
pub mod ops;
pub mod orchestrator;
pub mod outcome;
pub mod report;
pub mod retry;

// Re-export the main entry points
pub use config::Config;
pub use orchestrator::Orchestrator;
pub use report::Report;

// Disable colors for all tests to get clean output
#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    colored::control::set_override(false);
}

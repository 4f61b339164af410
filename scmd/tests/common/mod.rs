pub mod fixtures;
pub mod logging;

pub use fixtures::{SECRET, TestInstall};
pub use logging::init_test_logging;

pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{publisher, publisher_with};
#[allow(unused_imports)]
pub use mocks::{FailingStore, FailureMode};

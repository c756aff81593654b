pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{ALIAS_KEY, SQL, bootstrapper, descriptor, published_store, with_database};
#[allow(unused_imports)]
pub use mocks::{RecordingSink, ScriptedProbe, ScriptedStore, Step};

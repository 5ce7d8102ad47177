// Test module organization
pub mod fixtures;
pub mod test_collection;
pub mod test_convert;
pub mod test_gc;
pub mod test_lib;
pub mod test_light_ud;
pub mod test_registry;
pub mod test_weak_ref;

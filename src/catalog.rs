pub mod chapter;
pub mod course;
pub mod store;

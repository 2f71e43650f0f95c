pub mod filesystem;

pub use filesystem::{reserve_in, Family, FileStorage, Reserved, Stage};

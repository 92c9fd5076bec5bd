pub mod daemon;
pub mod status;
pub mod sync;
pub mod targets;
pub mod validate;

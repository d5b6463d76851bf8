#[cfg(any(feature = "devel", feature = "editor"))]
pub mod debug;

pub mod physics;
pub mod portal;
pub mod sandbox;

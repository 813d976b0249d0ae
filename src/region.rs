pub mod aggregate;
pub mod atlas;
pub mod mask;

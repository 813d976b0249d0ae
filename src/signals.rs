pub mod clean;
pub mod confounds;
pub mod filter;
pub mod stats;

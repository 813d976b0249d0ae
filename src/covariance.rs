pub mod cv;
pub mod empirical;
pub mod glasso;
pub mod linalg;

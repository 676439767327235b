pub mod margin;
pub mod resolver;
pub mod review;

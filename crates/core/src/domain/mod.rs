pub mod artifacts;
pub mod contract;
pub mod discount;
pub mod margin;
pub mod quote;

pub mod dataset;
pub mod persistence;
pub mod training;

pub mod collection;
pub mod operation;

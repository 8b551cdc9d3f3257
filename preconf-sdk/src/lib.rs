pub mod contracts;
pub mod objects;

pub mod provision;
pub mod validate;

pub mod fetch;
pub mod push;

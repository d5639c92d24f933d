pub mod input_backend;
pub mod link;
pub mod logging;

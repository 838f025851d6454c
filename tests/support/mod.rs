pub mod helpers;
pub mod host;
pub mod service;

pub mod error;
pub mod logs;
pub mod model;
pub mod service;

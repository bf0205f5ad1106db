pub mod classifier;
pub mod email;
pub mod parse;
pub mod service;
pub mod templates;

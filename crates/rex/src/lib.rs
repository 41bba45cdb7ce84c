pub mod errors;
pub mod framing;
pub mod gateway;
pub mod models;
pub mod normalizer;
pub mod process;
pub mod prompt_template;
pub mod providers;

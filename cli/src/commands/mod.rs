pub mod cli;
pub mod profiles;
pub mod submit;

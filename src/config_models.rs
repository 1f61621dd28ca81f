pub mod cli_args;
pub mod session_config;

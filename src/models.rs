pub mod channel;
pub mod endpoint;
pub mod message;
pub mod session_code;
pub mod status;

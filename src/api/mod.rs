pub mod error;
pub mod handler_utils;
pub mod rate_limit;
pub mod results;
pub mod server;
pub mod status;
pub mod upscale;

pub mod http;
pub mod postgres;
pub mod redis;

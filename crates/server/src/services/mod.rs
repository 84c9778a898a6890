pub mod gateway;
pub mod seed;
pub mod thread;

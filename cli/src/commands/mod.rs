pub mod config;
pub mod cpu;
pub mod debug;
pub mod pipe;
pub mod profile;

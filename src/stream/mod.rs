//! Request multiplexing over stream ids

mod manager;

pub use manager::StreamManager;

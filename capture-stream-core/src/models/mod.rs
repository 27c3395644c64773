pub mod error;
pub mod frame;
pub mod state;
pub mod stream_info;

pub mod packet_buffer;
pub mod state_tracker;
pub mod stream_format;

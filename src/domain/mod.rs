pub mod events;
pub mod input_buffer;
pub mod link;
pub mod settings;
pub mod state;
pub mod write_queue;

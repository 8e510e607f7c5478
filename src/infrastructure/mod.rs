pub mod bluetooth;
pub mod logging;
pub mod retry_timer;

pub mod dispatch;
pub mod processor;
pub mod task;

pub mod filesystem;
pub mod init;
pub mod lock;
pub mod queue;
pub mod run;
pub mod study;
pub mod tick;

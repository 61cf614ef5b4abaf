pub mod init_store;
pub mod sync;
pub mod watermarks;

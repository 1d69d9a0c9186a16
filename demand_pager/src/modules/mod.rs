pub mod block_device;
pub mod file_store;
pub mod page_directory;

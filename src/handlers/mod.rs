pub mod bucket_handlers;
pub mod file_handlers;
pub mod health_handlers;
pub mod presigned_handlers;

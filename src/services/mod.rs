pub mod bucket_store;
pub mod lister;
pub mod object_store;

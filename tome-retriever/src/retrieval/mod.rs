pub mod builder;
pub mod cache;
pub mod loader;
pub mod path_key;
pub mod vector_index;

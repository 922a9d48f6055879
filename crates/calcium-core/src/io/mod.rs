pub mod archive;
pub mod image_export;
pub mod npy;
pub mod npy_writer;

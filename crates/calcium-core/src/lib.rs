pub mod consts;
pub mod error;
pub mod io;
pub mod keys;
pub mod loader;
pub mod normalize;
pub mod params;
pub mod paths;
pub mod pipeline;
pub mod records;
pub mod scan;
pub mod store;

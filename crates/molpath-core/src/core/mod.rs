pub mod io;
pub mod models;
pub mod traits;
pub mod tree;

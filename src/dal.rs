pub mod routes;
pub mod stops;

pub use routes::*;
pub use stops::*;

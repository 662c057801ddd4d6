pub mod outcome;
pub mod request;
pub mod status;

pub use outcome::*;
pub use request::*;
pub use status::*;

pub mod fs;
pub mod hash;
pub mod logging;
pub mod signals;
pub mod sleep;

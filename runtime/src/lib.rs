mod shutdown;

pub mod logger;

pub use shutdown::Shutdown;

pub mod scanner;

pub use scanner::{run, ExpiryScanner, ScanReport};

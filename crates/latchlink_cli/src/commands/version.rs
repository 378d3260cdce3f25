//! Version command implementation.

/// Prints version information.
pub fn run() {
    println!("LatchLink CLI v{}", env!("CARGO_PKG_VERSION"));
}

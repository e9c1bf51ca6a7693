use std::io::Write;

/// Where command modules send what the user sees.
///
/// Commands never call `println!` directly, so their output can be captured
/// in tests.
pub trait UserOutput: Send + Sync {
    /// Plain line on stdout (tables, JSON documents).
    fn status(&self, message: &str);

    /// Completed action on stdout.
    fn success(&self, message: &str);

    /// Non-fatal problem on stderr.
    fn warning(&self, message: &str);

    /// Failure on stderr.
    fn error(&self, message: &str);

    fn blank(&self);
}

/// Standard terminal output; errors in red.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
        std::io::stderr().flush().ok();
    }

    fn blank(&self) {
        println!();
    }
}

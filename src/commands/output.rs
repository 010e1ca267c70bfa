//! Output helpers with BrokenPipe handling.
//!
//! Listings and entry content are often piped into `head`, which closes the
//! pipe early. That is treated as a clean exit rather than an error.

/// Print with newline, returning `Ok(())` early on BrokenPipe.
#[macro_export]
macro_rules! print_line {
    ($($arg:tt)*) => {{
        use std::io::Write;
        match writeln!(std::io::stdout(), $($arg)*) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }};
}

/// Copy a reader to stdout, returning `Ok(())` early on BrokenPipe.
#[macro_export]
macro_rules! copy_to_stdout {
    ($reader:expr) => {{
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        match std::io::copy($reader, &mut out).and_then(|_| std::io::Write::flush(&mut out)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }};
}

pub use copy_to_stdout;
pub use print_line;

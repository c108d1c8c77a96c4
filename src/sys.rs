//! Shared system-call helpers.

use std::io;

/// Run `op` again for as long as it fails with `EINTR`; any other outcome is
/// returned unchanged.
pub fn retry_on_interrupt<T, F>(mut op: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    loop {
        match op() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

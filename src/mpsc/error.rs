use std::fmt;

/// Returned by sends on a terminated queue; carries the value back to the
/// caller instead of dropping it.
#[derive(Debug, PartialEq, Eq)]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Consumes the error, yielding the value that could not be sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sending on a terminated queue")
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

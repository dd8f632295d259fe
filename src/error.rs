use std::any::type_name;

use parse_display::Display;

/// Errors reported by domains and observable values.
///
/// Apart from [`Spawn`](Error::Spawn), every variant describes a defect in the caller:
/// the short forms of the operations (`get`, `set`, `subscribe`, ...) panic with this message,
/// the `try_*` forms return it.
#[non_exhaustive]
#[derive(Display, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[display("domain `{domain}` was accessed from a thread it is not bound to")]
    Confinement { domain: String },

    #[display("domain `{domain}` is not bound to an execution context")]
    Unbound { domain: String },

    #[display("domain `{domain}` may only be bound once")]
    AlreadyBound { domain: String },

    #[display("domain `{domain}` is no longer running")]
    Stopped { domain: String },

    #[display("observable value has been disposed")]
    Disposed,

    #[display("type mismatch: value is not a `{expected}`")]
    TypeMismatch { expected: &'static str },

    #[display("unknown property `{name}`")]
    UnknownProperty { name: String },

    #[display("property `{name}` is read-only")]
    ReadOnlyProperty { name: String },

    #[display("no subscription capture is active on this thread")]
    NoCapture,

    #[display("failed to spawn domain thread: {0}")]
    Spawn(String),
}

impl Error {
    pub(crate) fn type_mismatch<T: ?Sized>() -> Self {
        Error::TypeMismatch {
            expected: type_name::<T>(),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) trait OrFatal<T> {
    fn or_fatal(self) -> T;
}
impl<T> OrFatal<T> for Result<T> {
    #[track_caller]
    fn or_fatal(self) -> T {
        match self {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }
}

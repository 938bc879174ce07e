use core::fmt::{Debug, Display};
use downcast_rs::{impl_downcast, DowncastSync};

/// Trait that allows the host to return custom errors.
///
/// It should be useful for representing failures of host call-outs: the
/// `OSCLI` gateway, keyboard input or library loading. Types implementing
/// this trait can be boxed into the engine's error type and recovered by
/// the embedder through downcasting.
///
/// # Examples
///
/// ```rust
/// use std::fmt;
/// use basmi_core::HostError;
///
/// #[derive(Debug)]
/// struct CommandFailed {
///     status: i32,
/// }
///
/// impl fmt::Display for CommandFailed {
///     fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
///         write!(f, "command failed with status {}", self.status)
///     }
/// }
///
/// impl HostError for CommandFailed {}
///
/// let boxed: Box<dyn HostError> = Box::new(CommandFailed { status: 127 });
/// let concrete = boxed.downcast_ref::<CommandFailed>().unwrap();
/// assert_eq!(concrete.status, 127);
/// ```
pub trait HostError: 'static + Display + Debug + DowncastSync {}
impl_downcast!(HostError);

#[cfg(feature = "std")]
impl HostError for std::io::Error {}

use core::time::Duration;

/// Per-call override of the client's default request timeout.
///
/// - `Inherit`: use the client default (if any).
/// - `Clear`: send without a timeout.
/// - `Set(d)`: force `d` for this call.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum TimeoutOverride {
    #[default]
    Inherit,
    Clear,
    Set(Duration),
}

impl TimeoutOverride {
    #[inline]
    pub fn resolve(self, default: Option<Duration>) -> Option<Duration> {
        match self {
            TimeoutOverride::Inherit => default,
            TimeoutOverride::Clear => None,
            TimeoutOverride::Set(d) => Some(d),
        }
    }
}

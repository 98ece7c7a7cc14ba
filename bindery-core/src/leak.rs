use std::fmt::{self, Display};
#[cfg(debug_assertions)]
use std::panic::Location;

/// Where a statement or connection was created.
///
/// The location is only tracked in builds with `debug_assertions`, release
/// builds carry an empty marker.
#[derive(Clone, Copy, Debug)]
pub struct CreationSite {
    #[cfg(debug_assertions)]
    location: &'static Location<'static>,
}

impl CreationSite {
    #[track_caller]
    pub fn capture() -> Self {
        Self {
            #[cfg(debug_assertions)]
            location: Location::caller(),
        }
    }
}

impl Display for CreationSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(debug_assertions)]
        return write!(f, "{}", self.location);
        #[cfg(not(debug_assertions))]
        f.write_str("<creation site not tracked>")
    }
}

/// Non fatal diagnostic: a resource reached its drop while still open.
///
/// The resource is still released, the warning only points at the code that
/// forgot to close it.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLeakWarning {
    pub resource: &'static str,
    pub created_at: CreationSite,
}

impl ResourceLeakWarning {
    pub(crate) fn report(resource: &'static str, created_at: CreationSite) {
        log::warn!(
            "{}",
            ResourceLeakWarning {
                resource,
                created_at
            }
        );
    }
}

impl Display for ResourceLeakWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resource leak: {} created at {} was not closed explicitly, releasing it on drop",
            self.resource, self.created_at
        )
    }
}

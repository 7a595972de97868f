use crate::{ElevatePrivilege, ZombieError};

/// Name of the privilege needed to open arbitrary processes.
pub const SE_DEBUG_NAME: &str = "SeDebugPrivilege";

/// A guard that gives the calling thread its own security context with a
/// privilege enabled, and reverts the thread to the process context on drop.
pub struct PrivilegeGuard<'a, Driver>
where
    Driver: ElevatePrivilege + ?Sized,
{
    driver: &'a Driver,
}

impl<'a, Driver> PrivilegeGuard<'a, Driver>
where
    Driver: ElevatePrivilege + ?Sized,
{
    /// Impersonates self and enables `privilege` in the thread context.
    ///
    /// If the privilege cannot be enabled, the impersonation is reverted
    /// before the error is returned.
    pub fn new(driver: &'a Driver, privilege: &'static str) -> Result<Self, ZombieError> {
        let wrap = |err| ZombieError::Privilege {
            privilege,
            source: Box::new(err),
        };

        driver.impersonate_self().map_err(wrap)?;
        let guard = Self { driver };

        driver.enable_privilege(privilege).map_err(wrap)?;
        Ok(guard)
    }
}

impl<Driver> Drop for PrivilegeGuard<'_, Driver>
where
    Driver: ElevatePrivilege + ?Sized,
{
    fn drop(&mut self) {
        if let Err(err) = self.driver.revert_to_self() {
            tracing::error!(?err, "Failed to revert the thread security context");
        }
    }
}

/// Runs `body` with `privilege` enabled on the calling thread.
///
/// The body is not invoked if the privilege cannot be enabled. The thread
/// is returned to the process security context on every path.
pub fn with_privilege<Driver, T>(
    driver: &Driver,
    privilege: &'static str,
    body: impl FnOnce() -> Result<T, ZombieError>,
) -> Result<T, ZombieError>
where
    Driver: ElevatePrivilege + ?Sized,
{
    let _guard = PrivilegeGuard::new(driver, privilege)?;
    body()
}

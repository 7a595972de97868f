use crate::{HandleValue, ZombieDriver};

/// A handle owned by the calling process, closed exactly once on drop.
///
/// Every handle returned by an enumeration primitive is wrapped in an
/// `OwnedHandle` immediately. Moving it into a collection transfers
/// ownership; [`into_raw`] gives the handle up without closing it.
///
/// [`into_raw`]: Self::into_raw
pub struct OwnedHandle<'a, Driver>
where
    Driver: ZombieDriver + ?Sized,
{
    driver: &'a Driver,
    handle: HandleValue,
}

impl<'a, Driver> OwnedHandle<'a, Driver>
where
    Driver: ZombieDriver + ?Sized,
{
    /// Takes ownership of a raw handle.
    pub fn new(driver: &'a Driver, handle: HandleValue) -> Self {
        Self { driver, handle }
    }

    /// Returns the raw handle value without giving up ownership.
    pub fn as_raw(&self) -> HandleValue {
        self.handle
    }

    /// Gives up ownership of the raw handle without closing it.
    pub fn into_raw(self) -> HandleValue {
        let handle = self.handle;
        std::mem::forget(self);
        handle
    }
}

impl<Driver> std::fmt::Debug for OwnedHandle<'_, Driver>
where
    Driver: ZombieDriver + ?Sized,
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("OwnedHandle").field(&self.handle).finish()
    }
}

impl<Driver> Drop for OwnedHandle<'_, Driver>
where
    Driver: ZombieDriver + ?Sized,
{
    fn drop(&mut self) {
        if let Err(err) = self.driver.close_handle(self.handle) {
            tracing::error!(?err, handle = %self.handle, "Failed to close handle");
        }
    }
}

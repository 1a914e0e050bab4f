use std::time::Duration;

/// Platform hooks the installer needs after a successful commit.
pub trait SystemControl {
    /// Wait `grace` so in-flight status requests can finish, then reboot.
    ///
    /// On hardware this does not return.
    fn restart(&mut self, grace: Duration);
}

impl<Y: SystemControl + ?Sized> SystemControl for &mut Y {
    fn restart(&mut self, grace: Duration) {
        (**self).restart(grace)
    }
}

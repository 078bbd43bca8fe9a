//! # Microphone Permission
//!
//! Asking for the microphone may suspend for as long as the user takes to
//! answer a system prompt, so the seam is asynchronous.

use futures_util::future::{self, BoxFuture, FutureExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Platform permission prompt.
pub trait MicrophonePermission: Send + Sync {
    fn request(&self) -> BoxFuture<'_, PermissionStatus>;
}

/// Fixed answer, for hosts without a prompt (desktop) or for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(PermissionStatus);

impl StaticPermission {
    /// Always grants access.
    pub fn granted() -> Self {
        Self(PermissionStatus::Granted)
    }

    pub fn denied() -> Self {
        Self(PermissionStatus::Denied)
    }
}

impl MicrophonePermission for StaticPermission {
    fn request(&self) -> BoxFuture<'_, PermissionStatus> {
        future::ready(self.0).boxed()
    }
}

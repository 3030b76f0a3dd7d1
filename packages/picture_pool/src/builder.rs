use std::any::type_name;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{HookError, LockHook, Picture, PicturePool, Result, UnlockHook};

/// Builder for creating an instance of [`PicturePool`].
///
/// The backing pictures are mandatory (though there may be zero of them), whereas the lock
/// and unlock hooks are optional. Hooks are meant for pictures backed by memory that must be
/// mapped before a consumer can use it, such as hardware decoder surfaces.
///
/// # Examples
///
/// ```
/// use picture_pool::{Chroma, HookError, Picture, PicturePool, VideoFormat};
///
/// let format = VideoFormat::new(Chroma::Nv12, 32, 32);
/// let pictures = (0..4)
///     .map(|_| Picture::new_from_format(&format))
///     .collect::<Result<Vec<_>, _>>()
///     .unwrap();
///
/// let pool = PicturePool::builder()
///     .pictures(pictures)
///     .lock_hook(|_picture| {
///         // Map the surface into process memory here.
///         Ok::<(), HookError>(())
///     })
///     .unlock_hook(|_picture| {
///         // Unmap the surface here.
///     })
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.size(), 4);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing pool configuration to happen on different threads than where the pool is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[must_use]
pub struct PicturePoolBuilder {
    pictures: Vec<Picture>,
    lock_hook: Option<LockHook>,
    unlock_hook: Option<UnlockHook>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl PicturePoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            pictures: Vec::new(),
            lock_hook: None,
            unlock_hook: None,
            _not_sync: PhantomData,
        }
    }

    /// Adds backing pictures to the pool. Each picture occupies one slot, in the order given.
    ///
    /// May be called repeatedly; pictures from later calls get the later slots.
    #[inline]
    pub fn pictures(mut self, pictures: impl IntoIterator<Item = Picture>) -> Self {
        self.pictures.extend(pictures);
        self
    }

    /// Sets the hook that prepares a picture before it is leased.
    ///
    /// The hook runs without any pool lock held, so it may block. It is shown the picture
    /// before the consumer gets it and must not clone it. If the hook fails, the slot is
    /// skipped and the next available slot is tried.
    #[inline]
    pub fn lock_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Picture) -> std::result::Result<(), HookError> + Send + Sync + 'static,
    {
        self.lock_hook = Some(Arc::new(hook));
        self
    }

    /// Sets the hook that runs when a leased picture is returned to the pool.
    ///
    /// The hook runs without any pool lock held, on whichever thread released the picture.
    #[inline]
    pub fn unlock_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Picture) + Send + Sync + 'static,
    {
        self.unlock_hook = Some(Arc::new(hook));
        self
    }

    /// Builds the picture pool with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`][crate::Error::CapacityExceeded] if more than
    /// [`MAX_CAPACITY`][crate::MAX_CAPACITY] pictures were added. The pictures are released in
    /// that case.
    pub fn build(self) -> Result<PicturePool> {
        PicturePool::new_inner(self.pictures, self.lock_hook, self.unlock_hook)
    }
}

impl fmt::Debug for PicturePoolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("pictures", &self.pictures.len())
            .field("lock_hook", &self.lock_hook.is_some())
            .field("unlock_hook", &self.unlock_hook.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{Chroma, Error, MAX_CAPACITY, VideoFormat};

    assert_impl_all!(PicturePoolBuilder: Send);
    assert_not_impl_any!(PicturePoolBuilder: Sync);

    fn picture() -> Picture {
        Picture::new_from_format(&VideoFormat::new(Chroma::Gray8, 2, 2)).unwrap()
    }

    #[test]
    fn pictures_accumulate_in_order() {
        let first = picture();
        let second = picture();
        let observer = second.clone();

        let pool = PicturePool::builder()
            .pictures([first])
            .pictures([second])
            .build()
            .unwrap();

        assert_eq!(pool.size(), 2);

        let _leased_first = pool.get().unwrap();
        let leased_second = pool.get().unwrap();
        assert!(leased_second.shares_pixels_with(&observer));
    }

    #[test]
    fn empty_builder_builds_empty_pool() {
        let pool = PicturePool::builder().build().unwrap();

        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn oversized_builder_fails() {
        let result = PicturePool::builder()
            .pictures((0..=MAX_CAPACITY).map(|_| picture()))
            .build();

        assert!(matches!(result, Err(Error::CapacityExceeded { .. })));
    }

    #[test]
    fn debug_reports_configuration() {
        let builder = PicturePool::builder()
            .pictures([picture()])
            .lock_hook(|_| Ok(()));

        let debug = format!("{builder:?}");
        assert!(debug.contains("pictures: 1"));
        assert!(debug.contains("lock_hook: true"));
        assert!(debug.contains("unlock_hook: false"));
    }
}

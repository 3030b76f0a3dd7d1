use std::any::type_name;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::{Error, PlaneGeometry, Result, VideoFormat};

/// Custom logic that runs when the last holder of a [`Picture`] releases it.
///
/// Pictures without a finalizer simply free their pixel memory once the last handle is gone.
/// A finalizer can redirect that final release elsewhere, for example back into a pool that
/// owns the picture and wants to hand it out again.
///
/// The finalizer is called from whichever thread drops the last handle, while no locks of the
/// picture are held. It receives a handle whose reference count is already zero; it must not
/// clone that handle.
pub trait Finalize: Send + Sync + 'static {
    /// Called once every time the reference count of `picture` drops to zero.
    fn finalize(&self, picture: &Picture);
}

/// One plane of pixel memory, e.g. the luma plane of a YUV picture.
///
/// Access to the pixel bytes goes through a reader/writer lock, so a plane can be shared
/// between threads even when several pictures alias it.
pub struct Plane {
    geometry: PlaneGeometry,
    pixels: RwLock<Box<[u8]>>,
}

impl Plane {
    /// Allocates a zero-filled plane of the given size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the memory cannot be reserved. A geometry whose size
    /// overflows `usize` is reported as a failure to allocate `usize::MAX` bytes.
    pub fn new(geometry: PlaneGeometry) -> Result<Self> {
        let bytes = geometry.bytes().ok_or(Error::Allocation { bytes: usize::MAX })?;

        let mut pixels = Vec::new();
        if pixels.try_reserve_exact(bytes).is_err() {
            return Err(Error::Allocation { bytes });
        }
        pixels.resize(bytes, 0);

        Ok(Self {
            geometry,
            pixels: RwLock::new(pixels.into_boxed_slice()),
        })
    }

    /// Number of lines in the plane.
    #[must_use]
    pub fn lines(&self) -> usize {
        self.geometry.lines()
    }

    /// Number of bytes between the starts of consecutive lines.
    #[must_use]
    pub fn pitch(&self) -> usize {
        self.geometry.pitch()
    }

    /// Locks the plane for reading and returns its pixel bytes.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.pixels.read(), |pixels| &**pixels)
    }

    /// Locks the plane for writing and returns its pixel bytes.
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        RwLockWriteGuard::map(self.pixels.write(), |pixels| &mut **pixels)
    }
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("lines", &self.geometry.lines())
            .field("pitch", &self.geometry.pitch())
            .finish_non_exhaustive()
    }
}

pub(crate) struct PictureCore {
    format: VideoFormat,
    planes: Arc<[Plane]>,

    // Number of live `Picture` handles. Zero while a pooled picture sits idle in its pool.
    refs: AtomicUsize,

    finalizer: Mutex<Option<Arc<dyn Finalize>>>,
}

impl PictureCore {
    /// Creates a picture core with no holders and no finalizer, aliasing the planes of
    /// `template`.
    ///
    /// The core is not reachable through any counted [`Picture`] handle until it is armed via
    /// [`UnarmedPicture::arm()`].
    pub(crate) fn new_idle(template: &Picture) -> Arc<Self> {
        Arc::new(Self {
            format: template.core.format,
            planes: Arc::clone(&template.core.planes),
            refs: AtomicUsize::new(0),
            finalizer: Mutex::new(None),
        })
    }

    /// Registers the logic that runs when the picture is released by its last holder.
    pub(crate) fn install_finalizer(&self, finalizer: Arc<dyn Finalize>) {
        *self.finalizer.lock() = Some(finalizer);
    }

    /// Removes the finalizer, so the next release to zero no longer invokes it.
    pub(crate) fn detach_finalizer(&self) -> Option<Arc<dyn Finalize>> {
        self.finalizer.lock().take()
    }
}

/// A reference-counted handle to a video picture: a format plus its planes of pixel memory.
///
/// Cloning the handle adds a holder and dropping it releases one. When the last holder
/// releases the picture, its [finalizer][Finalize] runs (if one is registered) and the
/// picture memory is freed once nothing else refers to it.
///
/// # Thread safety
///
/// Handles are thread-safe and can be moved and shared across threads. Pixel access is
/// synchronized per plane.
///
/// # Examples
///
/// ```
/// use picture_pool::{Chroma, Picture, VideoFormat};
///
/// let picture = Picture::new_from_format(&VideoFormat::new(Chroma::Gray8, 4, 2)).unwrap();
/// picture.planes()[0].write()[0] = 0xFF;
///
/// let held = picture.clone();
/// assert_eq!(held.ref_count(), 2);
/// assert_eq!(held.planes()[0].read()[0], 0xFF);
/// ```
pub struct Picture {
    core: Arc<PictureCore>,
}

impl Picture {
    /// Allocates a new picture with zero-filled planes sized for `format`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if the format cannot describe a picture and
    /// [`Error::Allocation`] if pixel memory cannot be reserved.
    pub fn new_from_format(format: &VideoFormat) -> Result<Self> {
        let planes = format
            .plane_geometry()?
            .into_iter()
            .map(Plane::new)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new_from_resource(*format, planes.into(), None))
    }

    /// Wraps existing planes in a new picture with one holder.
    ///
    /// The planes are shared, not copied: pictures created from the same `planes` alias the
    /// same pixel memory. The optional `finalizer` runs every time the last holder releases
    /// the picture.
    #[must_use]
    pub fn new_from_resource(
        format: VideoFormat,
        planes: Arc<[Plane]>,
        finalizer: Option<Arc<dyn Finalize>>,
    ) -> Self {
        Self {
            core: Arc::new(PictureCore {
                format,
                planes,
                refs: AtomicUsize::new(1),
                finalizer: Mutex::new(finalizer),
            }),
        }
    }

    /// The format this picture was created with.
    #[must_use]
    pub fn format(&self) -> &VideoFormat {
        &self.core.format
    }

    /// All planes of the picture, in format order.
    #[must_use]
    pub fn planes(&self) -> &[Plane] {
        &self.core.planes
    }

    /// The plane at `index`, if the picture has that many planes.
    #[must_use]
    pub fn plane(&self, index: usize) -> Option<&Plane> {
        self.core.planes.get(index)
    }

    /// A shared reference to the plane array, for building pictures that alias this one.
    #[must_use]
    pub fn shared_planes(&self) -> Arc<[Plane]> {
        Arc::clone(&self.core.planes)
    }

    /// The number of holders currently referencing this picture.
    ///
    /// The value is a snapshot and may be stale by the time it is observed.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.core.refs.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same picture instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Whether both pictures alias the same pixel memory, even if they are distinct pictures.
    #[must_use]
    pub fn shares_pixels_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core.planes, &other.core.planes)
    }

    /// Releases the picture on behalf of whoever holds it, driving the count to zero.
    ///
    /// Any remaining handles become dangling holders: releasing them later is a protocol
    /// violation and panics.
    ///
    /// # Panics
    ///
    /// Panics if the picture has no holders.
    pub(crate) fn force_release(core: &Arc<PictureCore>) {
        let previous = core.refs.swap(1, Ordering::AcqRel);
        assert!(previous > 0, "force-released a picture that has no holders");

        drop(Self {
            core: Arc::clone(core),
        });
    }
}

impl Clone for Picture {
    fn clone(&self) -> Self {
        // A failed clone leaves the count untouched.
        let added = self
            .core
            .refs
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |refs| {
                if refs == 0 {
                    None
                } else {
                    Some(refs.wrapping_add(1))
                }
            });
        assert!(added.is_ok(), "cloned a picture that has no holders");

        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl Drop for Picture {
    fn drop(&mut self) {
        let previous = self.core.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(
            previous > 0,
            "released a picture that has already been released by all its holders"
        );

        if previous != 1 {
            return;
        }

        // Cloned out of the lock: the finalizer may detach finalizers itself, including
        // this one, when returning the last lease tears down the pool.
        let finalizer = self.core.finalizer.lock().as_ref().map(Arc::clone);

        if let Some(finalizer) = finalizer {
            finalizer.finalize(self);
        }
    }
}

impl fmt::Debug for Picture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("format", &self.core.format)
            .field("planes", &self.core.planes)
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

/// A [`Picture`] handle that does not count as a holder.
///
/// Used to show an idle pooled picture to hooks and visitors before (or without) leasing it.
/// Dropping it leaves the reference count untouched.
pub(crate) struct UnarmedPicture {
    picture: ManuallyDrop<Picture>,
}

impl UnarmedPicture {
    pub(crate) fn new(core: &Arc<PictureCore>) -> Self {
        Self {
            picture: ManuallyDrop::new(Picture {
                core: Arc::clone(core),
            }),
        }
    }

    /// Turns the handle into the single holder of its picture.
    ///
    /// # Panics
    ///
    /// Panics if the picture already has holders, which means it was leased twice.
    pub(crate) fn arm(self) -> Picture {
        let armed = self
            .picture
            .core
            .refs
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire);

        assert!(
            armed.is_ok(),
            "leased a pooled picture that still has {} holders",
            self.picture.ref_count()
        );

        let mut this = ManuallyDrop::new(self);

        // SAFETY: `this` is never used again and its destructor never runs, so the picture
        // is taken out exactly once.
        unsafe { ManuallyDrop::take(&mut this.picture) }
    }
}

impl Deref for UnarmedPicture {
    type Target = Picture;

    fn deref(&self) -> &Self::Target {
        &self.picture
    }
}

impl Drop for UnarmedPicture {
    fn drop(&mut self) {
        // SAFETY: The wrapped picture is never dropped, so its `Arc` is read out and released
        // exactly once, here. `arm()` prevents this destructor from running at all.
        drop(unsafe { ptr::read(&self.picture.core) });
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::Chroma;

    assert_impl_all!(Picture: Send, Sync);
    assert_impl_all!(Plane: Send, Sync);

    #[derive(Default)]
    struct CountingFinalizer {
        calls: AtomicUsize,
    }

    impl Finalize for CountingFinalizer {
        fn finalize(&self, picture: &Picture) {
            assert_eq!(picture.ref_count(), 0);
            self.calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn gray(width: u32, height: u32) -> VideoFormat {
        VideoFormat::new(Chroma::Gray8, width, height)
    }

    fn idle_core(finalizer: &Arc<CountingFinalizer>) -> Arc<PictureCore> {
        let template = Picture::new_from_format(&gray(2, 2)).unwrap();
        let core = PictureCore::new_idle(&template);
        core.install_finalizer(Arc::clone(finalizer) as Arc<dyn Finalize>);
        core
    }

    #[test]
    fn new_from_format_allocates_zeroed_planes() {
        let picture = Picture::new_from_format(&VideoFormat::new(Chroma::I420, 4, 4)).unwrap();

        assert_eq!(picture.planes().len(), 3);
        assert_eq!(picture.planes()[0].read().len(), 16);
        assert_eq!(picture.plane(1).unwrap().read().len(), 4);
        assert!(picture.planes()[2].read().iter().all(|b| *b == 0));
        assert!(picture.plane(3).is_none());
        assert_eq!(picture.ref_count(), 1);
    }

    #[test]
    fn new_from_format_rejects_invalid_format() {
        let result = Picture::new_from_format(&gray(0, 0));

        assert!(matches!(result, Err(Error::InvalidFormat { .. })));
    }

    #[test]
    fn new_from_format_reports_allocation_failure() {
        // Fits in usize but exceeds isize::MAX, so the reservation is refused without
        // touching the allocator.
        let result = Picture::new_from_format(&gray(u32::MAX, u32::MAX));

        assert!(matches!(result, Err(Error::Allocation { .. })));
    }

    #[test]
    fn finalizer_runs_when_last_holder_releases() {
        let finalizer = Arc::new(CountingFinalizer::default());
        let template = Picture::new_from_format(&gray(2, 2)).unwrap();

        let picture = Picture::new_from_resource(
            *template.format(),
            template.shared_planes(),
            Some(Arc::clone(&finalizer) as Arc<dyn Finalize>),
        );
        let held = picture.clone();

        drop(picture);
        assert_eq!(finalizer.calls.load(Ordering::Relaxed), 0);

        drop(held);
        assert_eq!(finalizer.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn aliasing_pictures_share_pixels() {
        let original = Picture::new_from_format(&gray(2, 2)).unwrap();
        let alias = Picture::new_from_resource(*original.format(), original.shared_planes(), None);
        let unrelated = Picture::new_from_format(&gray(2, 2)).unwrap();

        alias.planes()[0].write()[3] = 7;

        assert!(alias.shares_pixels_with(&original));
        assert!(!alias.ptr_eq(&original));
        assert!(!unrelated.shares_pixels_with(&original));
        assert_eq!(original.planes()[0].read()[3], 7);
    }

    #[test]
    fn armed_picture_finalizes_on_release() {
        let finalizer = Arc::new(CountingFinalizer::default());
        let core = idle_core(&finalizer);

        let unarmed = UnarmedPicture::new(&core);
        assert_eq!(unarmed.ref_count(), 0);

        let picture = unarmed.arm();
        assert_eq!(picture.ref_count(), 1);

        drop(picture);
        assert_eq!(finalizer.calls.load(Ordering::Relaxed), 1);
        assert_eq!(core.refs.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn unarmed_drop_leaves_count_untouched() {
        let finalizer = Arc::new(CountingFinalizer::default());
        let core = idle_core(&finalizer);

        drop(UnarmedPicture::new(&core));

        assert_eq!(core.refs.load(Ordering::Relaxed), 0);
        assert_eq!(Arc::strong_count(&core), 1);
        assert_eq!(finalizer.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn force_release_drives_count_to_zero() {
        let finalizer = Arc::new(CountingFinalizer::default());
        let core = idle_core(&finalizer);

        let picture = UnarmedPicture::new(&core).arm();
        let held = picture.clone();
        assert_eq!(picture.ref_count(), 2);

        Picture::force_release(&core);

        assert_eq!(core.refs.load(Ordering::Relaxed), 0);
        assert_eq!(finalizer.calls.load(Ordering::Relaxed), 1);

        // Releasing these now would be a double release.
        std::mem::forget(picture);
        std::mem::forget(held);
    }

    #[test]
    #[should_panic]
    fn arm_twice_panics() {
        let finalizer = Arc::new(CountingFinalizer::default());
        let core = idle_core(&finalizer);

        // Kept alive through the unwind so it is not released twice.
        std::mem::forget(UnarmedPicture::new(&core).arm());

        let _second = UnarmedPicture::new(&core).arm();
    }

    #[test]
    fn cloning_an_idle_picture_panics_without_arming_it() {
        let finalizer = Arc::new(CountingFinalizer::default());
        let core = idle_core(&finalizer);
        let unarmed = UnarmedPicture::new(&core);

        let result = panic::catch_unwind(AssertUnwindSafe(|| Picture::clone(&unarmed)));

        assert!(result.is_err());
        assert_eq!(core.refs.load(Ordering::Relaxed), 0);

        // The picture can still be leased normally.
        drop(unarmed.arm());
        assert_eq!(finalizer.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    #[should_panic]
    fn force_release_of_idle_picture_panics() {
        let finalizer = Arc::new(CountingFinalizer::default());
        let core = idle_core(&finalizer);

        Picture::force_release(&core);
    }

    #[test]
    fn detached_finalizer_no_longer_runs() {
        let finalizer = Arc::new(CountingFinalizer::default());
        let core = idle_core(&finalizer);

        assert!(core.detach_finalizer().is_some());
        assert!(core.detach_finalizer().is_none());

        drop(UnarmedPicture::new(&core).arm());

        assert_eq!(finalizer.calls.load(Ordering::Relaxed), 0);
    }
}

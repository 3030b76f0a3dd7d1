use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use nm::Event;
use parking_lot::Mutex;
use scopeguard::ScopeGuard;
use tracing::{debug, trace};

use crate::metrics::{EXHAUSTED, LEASES, LOCK_HOOK_FAILURES, RESET_RECLAIMED, RETURNS};
use crate::{
    Error, Finalize, HookError, Picture, PictureCore, PicturePoolBuilder, Result, SlotMask,
    UnarmedPicture, VideoFormat, check_capacity,
};

/// Prepares a picture for use by a consumer, e.g. by mapping hardware surface memory.
pub(crate) type LockHook =
    Arc<dyn Fn(&Picture) -> std::result::Result<(), HookError> + Send + Sync>;

/// Undoes the work of a [`LockHook`] when a picture is returned.
pub(crate) type UnlockHook = Arc<dyn Fn(&Picture) + Send + Sync>;

/// Global counter for generating unique pool IDs, used to tell pools apart in logs.
static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[cfg_attr(test, mutants::skip)] // Only used to tell pools apart in logs.
fn generate_pool_id() -> u64 {
    POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
struct PoolState {
    available: SlotMask,

    // One for the owning `PicturePool` handle plus one per leased picture.
    refs: usize,
}

pub(crate) struct PoolShared {
    pool_id: u64,
    state: Mutex<PoolState>,

    // Never resized or reordered after construction, so it can be read without the lock.
    slots: Box<[Arc<PictureCore>]>,

    lock_hook: Option<LockHook>,
    unlock_hook: Option<UnlockHook>,
}

impl PoolShared {
    fn lease(&self) -> Option<Picture> {
        let mut state = self.state.lock();
        assert!(state.refs > 0, "leased from a picture pool that has been torn down");

        let mut next = 0;

        while let Some(index) = state.available.first_set_from(next) {
            next = index.wrapping_add(1);

            let Some(slot) = self.slots.get(index) else {
                break;
            };

            state.available.clear(index);
            state.refs = state.refs.wrapping_add(1);

            let picture = UnarmedPicture::new(slot);

            let Some(lock_hook) = &self.lock_hook else {
                drop(state);
                return Some(self.hand_out(index, picture));
            };

            // The hook may block on hardware, so other threads must be able to lease and
            // return in the meantime.
            drop(state);

            // Puts the slot back if the hook panics.
            let rollback_guard = scopeguard::guard((), move |()| {
                Self::roll_back_lease(&mut self.state.lock(), index);
            });

            let locked = lock_hook(&picture);
            ScopeGuard::into_inner(rollback_guard);

            let Err(error) = locked else {
                return Some(self.hand_out(index, picture));
            };

            state = self.state.lock();
            Self::roll_back_lease(&mut state, index);

            debug!(
                pool_id = self.pool_id,
                index,
                %error,
                "lock hook refused picture, skipping slot"
            );
            LOCK_HOOK_FAILURES.with(Event::observe_once);
        }

        drop(state);

        trace!(pool_id = self.pool_id, "no picture available");
        EXHAUSTED.with(Event::observe_once);

        None
    }

    /// Undoes the bookkeeping of a lease attempt that did not hand out its picture.
    fn roll_back_lease(state: &mut PoolState, index: usize) {
        state.available.set(index);
        state.refs = state.refs.wrapping_sub(1);
    }

    fn hand_out(&self, index: usize, picture: UnarmedPicture) -> Picture {
        trace!(pool_id = self.pool_id, index, "leased picture");
        LEASES.with(Event::observe_once);

        picture.arm()
    }

    /// Makes a slot available again after the last holder of its picture released it.
    fn return_slot(&self, index: usize, picture: &Picture) {
        if let Some(unlock_hook) = &self.unlock_hook {
            // Returns the slot even if the hook panics.
            let return_guard = scopeguard::guard((), move |()| self.make_available(index));

            unlock_hook(picture);

            ScopeGuard::into_inner(return_guard);
        }

        self.make_available(index);
    }

    fn make_available(&self, index: usize) {
        {
            let mut state = self.state.lock();
            assert!(
                !state.available.is_set(index),
                "picture {index} returned to pool {} while already available",
                self.pool_id
            );
            state.available.set(index);
        }

        trace!(pool_id = self.pool_id, index, "returned picture");
        RETURNS.with(Event::observe_once);

        self.release();
    }

    /// Drops one reference to the pool, tearing it down if that was the last one.
    fn release(&self) {
        let destroy = {
            let mut state = self.state.lock();
            assert!(state.refs > 0, "released a picture pool that has been torn down");

            state.refs = state.refs.wrapping_sub(1);
            state.refs == 0
        };

        if !destroy {
            return;
        }

        debug!(pool_id = self.pool_id, size = self.slots.len(), "tearing down picture pool");

        // Detaching the finalizers releases the backing pictures and breaks the reference
        // cycle between the slots and this pool. The caller keeps us alive until it returns.
        for slot in &self.slots {
            drop(slot.detach_finalizer());
        }
    }

    fn reset(&self) -> usize {
        let mut reclaimed: usize = 0;

        loop {
            let leased = {
                let state = self.state.lock();
                assert!(state.refs > 0, "reset a picture pool that has been torn down");

                state.available.first_clear(self.slots.len())
            };

            // The forced release re-enters `return_slot()`, which takes the pool lock, so
            // we have to rescan from scratch with a fresh lock every time.
            let Some(slot) = leased.and_then(|index| self.slots.get(index)) else {
                break;
            };

            Picture::force_release(slot);
            reclaimed = reclaimed.wrapping_add(1);
        }

        debug!(pool_id = self.pool_id, reclaimed, "reset picture pool");
        RESET_RECLAIMED.with(|event| event.observe(reclaimed));

        reclaimed
    }

    fn available(&self) -> SlotMask {
        self.state.lock().available
    }
}

impl fmt::Debug for PoolShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("pool_id", &self.pool_id)
            .field("state", &*self.state.lock())
            .field("size", &self.slots.len())
            .field("lock_hook", &self.lock_hook.is_some())
            .field("unlock_hook", &self.unlock_hook.is_some())
            .finish_non_exhaustive()
    }
}

/// The pool-bound finalizer of a slot picture, plus the slot's private metadata.
struct SlotReturn {
    pool: Arc<PoolShared>,

    // The picture whose planes the slot picture aliases. Released when the pool is torn down.
    #[expect(
        dead_code,
        reason = "only held to keep the backing picture alive until teardown"
    )]
    backing: Picture,

    index: usize,
}

impl Finalize for SlotReturn {
    fn finalize(&self, picture: &Picture) {
        self.pool.return_slot(self.index, picture);
    }
}

/// A fixed-capacity pool of reusable pictures.
///
/// The pool is created from a set of backing pictures. Each backing picture gets a slot in the
/// pool, holding a picture that aliases the same pixel memory. Leasing a picture via
/// [`get()`][Self::get] hands out one of these slot pictures; dropping the last handle to it
/// returns the slot to the pool instead of freeing the memory.
///
/// # Lifetime
///
/// Dropping the pool releases the backing pictures once every leased picture has been
/// returned. Leased pictures keep the pool alive, so it is fine to drop the pool while
/// consumers are still working with its pictures.
///
/// # Thread safety
///
/// The pool is thread-safe. Leasing and returning can happen concurrently from any thread.
///
/// # Examples
///
/// ```
/// use picture_pool::{Chroma, PicturePool, VideoFormat};
///
/// let format = VideoFormat::new(Chroma::I420, 64, 32);
/// let pool = PicturePool::from_format(&format, 2).unwrap();
///
/// let first = pool.get().unwrap();
/// let second = pool.get().unwrap();
///
/// // Both pictures are leased, so the pool is exhausted.
/// assert!(pool.get().is_none());
///
/// // Dropping a picture returns it to the pool.
/// drop(first);
/// let third = pool.get().unwrap();
/// # drop((second, third));
/// ```
pub struct PicturePool {
    shared: Arc<PoolShared>,
}

impl PicturePool {
    /// Creates a pool holding the given backing pictures, without lock hooks.
    ///
    /// Use [`PicturePool::builder()`] to register lock hooks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] if there are more than
    /// [`MAX_CAPACITY`][crate::MAX_CAPACITY] pictures. The pictures are released in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use picture_pool::{Chroma, Picture, PicturePool, VideoFormat};
    ///
    /// let format = VideoFormat::new(Chroma::Rgba, 16, 16);
    /// let pictures = vec![
    ///     Picture::new_from_format(&format).unwrap(),
    ///     Picture::new_from_format(&format).unwrap(),
    /// ];
    ///
    /// let pool = PicturePool::new(pictures).unwrap();
    /// assert_eq!(pool.size(), 2);
    /// ```
    pub fn new(pictures: Vec<Picture>) -> Result<Self> {
        Self::builder().pictures(pictures).build()
    }

    /// Creates a builder for configuring a pool with lock hooks.
    pub fn builder() -> PicturePoolBuilder {
        PicturePoolBuilder::new()
    }

    /// Allocates `count` new pictures of the given format and creates a pool holding them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] if `count` exceeds
    /// [`MAX_CAPACITY`][crate::MAX_CAPACITY], or the allocation error of the first picture that
    /// could not be allocated. Pictures allocated before the failure are released.
    pub fn from_format(format: &VideoFormat, count: usize) -> Result<Self> {
        check_capacity(count)?;

        let pictures = (0..count)
            .map(|_| Picture::new_from_format(format))
            .collect::<Result<Vec<_>>>()?;

        Self::new(pictures)
    }

    /// Leases `count` pictures from `master` and creates a new pool holding them.
    ///
    /// The leased pictures return to `master` once the new pool is torn down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] if `count` exceeds
    /// [`MAX_CAPACITY`][crate::MAX_CAPACITY] and [`Error::Exhausted`] if `master` runs out of
    /// available pictures. Pictures leased before the failure are returned to `master`.
    ///
    /// # Examples
    ///
    /// ```
    /// use picture_pool::{Chroma, PicturePool, VideoFormat};
    ///
    /// let master = PicturePool::from_format(&VideoFormat::new(Chroma::Gray8, 8, 8), 5).unwrap();
    /// let reserved = PicturePool::reserve(&master, 2).unwrap();
    ///
    /// assert_eq!(master.leased_count(), 2);
    ///
    /// drop(reserved);
    /// assert_eq!(master.leased_count(), 0);
    /// ```
    pub fn reserve(master: &Self, count: usize) -> Result<Self> {
        check_capacity(count)?;

        let mut pictures = Vec::with_capacity(count);

        for _ in 0..count {
            let Some(picture) = master.get() else {
                return Err(Error::Exhausted {
                    requested: count,
                    obtained: pictures.len(),
                });
            };

            pictures.push(picture);
        }

        Self::new(pictures)
    }

    pub(crate) fn new_inner(
        pictures: Vec<Picture>,
        lock_hook: Option<LockHook>,
        unlock_hook: Option<UnlockHook>,
    ) -> Result<Self> {
        check_capacity(pictures.len())?;

        let slots = pictures
            .iter()
            .map(PictureCore::new_idle)
            .collect::<Box<[_]>>();

        let shared = Arc::new(PoolShared {
            pool_id: generate_pool_id(),
            state: Mutex::new(PoolState {
                available: SlotMask::all(slots.len()),
                refs: 1,
            }),
            slots,
            lock_hook,
            unlock_hook,
        });

        for (index, (slot, backing)) in shared.slots.iter().zip(pictures).enumerate() {
            slot.install_finalizer(Arc::new(SlotReturn {
                pool: Arc::clone(&shared),
                backing,
                index,
            }));
        }

        debug!(pool_id = shared.pool_id, size = shared.slots.len(), "created picture pool");

        Ok(Self { shared })
    }

    /// Leases an available picture from the pool.
    ///
    /// Slots are tried in index order. If a lock hook is registered, it is called for each
    /// candidate; a slot whose hook fails is skipped and the next available slot is tried.
    ///
    /// The picture returns to the pool when its last handle is dropped.
    ///
    /// Returns `None` if every picture is currently leased or refused by the lock hook. This
    /// is an expected condition under load; the pool never waits for a picture to be returned.
    #[must_use]
    pub fn get(&self) -> Option<Picture> {
        self.shared.lease()
    }

    /// Forcibly returns every leased picture to the pool, e.g. when flushing a pipeline.
    ///
    /// Returns the number of pictures that were reclaimed.
    ///
    /// # Panics
    ///
    /// Handles to reclaimed pictures are not invalidated. Dropping such a handle after the
    /// reset returns its slot a second time, which panics, so the caller must ensure that any
    /// remaining handles have been forgotten (e.g. because they were lost inside a hardware
    /// queue that was just flushed). Calling this concurrently with [`get()`][Self::get] may
    /// also panic.
    pub fn reset(&self) -> usize {
        self.shared.reset()
    }

    /// The number of pictures the pool holds, leased or not.
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.slots.len()
    }

    /// Calls `visitor` once for every picture in the pool, in slot order.
    ///
    /// The pool is not locked while visiting. Pictures may be leased or returned concurrently,
    /// so the visitor must not assume exclusive access to their pixel memory. The visitor must
    /// not clone the pictures it is shown.
    pub fn enumerate(&self, mut visitor: impl FnMut(&Picture)) {
        for slot in &self.shared.slots {
            let picture = UnarmedPicture::new(slot);
            visitor(&picture);
        }
    }

    /// A snapshot of the availability mask: bit `i` is set if slot `i` is not leased.
    #[must_use]
    pub fn available_mask(&self) -> u64 {
        self.shared.available().bits()
    }

    /// A snapshot of how many pictures are currently leased.
    #[must_use]
    pub fn leased_count(&self) -> usize {
        self.size().wrapping_sub(self.shared.available().count())
    }
}

impl Drop for PicturePool {
    fn drop(&mut self) {
        self.shared.release();
    }
}

impl fmt::Debug for PicturePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("shared", &self.shared)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::{OnceLock, Weak};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{Chroma, MAX_CAPACITY};

    assert_impl_all!(PicturePool: Send, Sync);

    fn format() -> VideoFormat {
        VideoFormat::new(Chroma::Gray8, 4, 4)
    }

    fn backing(count: usize) -> Vec<Picture> {
        (0..count)
            .map(|_| Picture::new_from_format(&format()).unwrap())
            .collect()
    }

    #[test]
    fn new_pool_is_fully_available() {
        let pool = PicturePool::new(backing(3)).unwrap();

        assert_eq!(pool.size(), 3);
        assert_eq!(pool.available_mask(), 0b111);
        assert_eq!(pool.leased_count(), 0);
    }

    #[test]
    fn empty_pool_is_always_exhausted() {
        let pool = PicturePool::new(Vec::new()).unwrap();

        assert_eq!(pool.size(), 0);
        assert!(pool.get().is_none());
        assert_eq!(pool.reset(), 0);
    }

    #[test]
    fn capacity_limit_is_enforced() {
        let result = PicturePool::new(backing(MAX_CAPACITY + 1));

        assert!(matches!(
            result,
            Err(Error::CapacityExceeded {
                requested: 65,
                max: 64
            })
        ));
    }

    #[test]
    fn failed_construction_releases_pictures() {
        let pictures = backing(MAX_CAPACITY + 1);
        let observer = pictures[0].clone();
        assert_eq!(observer.ref_count(), 2);

        PicturePool::new(pictures).unwrap_err();

        assert_eq!(observer.ref_count(), 1);
    }

    #[test]
    fn full_capacity_pool_leases_every_slot() {
        let pool = PicturePool::new(backing(MAX_CAPACITY)).unwrap();

        let leased = (0..MAX_CAPACITY)
            .map(|_| pool.get().unwrap())
            .collect::<Vec<_>>();

        assert!(pool.get().is_none());
        assert_eq!(pool.available_mask(), 0);

        drop(leased);
        assert_eq!(pool.available_mask(), u64::MAX);
    }

    #[test]
    fn leased_pictures_alias_backing_pictures() {
        let pictures = backing(2);
        let observers = pictures.iter().map(Picture::clone).collect::<Vec<_>>();
        let pool = PicturePool::new(pictures).unwrap();

        let first = pool.get().unwrap();
        let second = pool.get().unwrap();

        assert!(first.shares_pixels_with(&observers[0]));
        assert!(second.shares_pixels_with(&observers[1]));
        assert!(!first.ptr_eq(&observers[0]));
        assert_eq!(first.ref_count(), 1);
    }

    #[test]
    fn slot_index_tracks_lease_and_return() {
        let pool = PicturePool::new(backing(3)).unwrap();

        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        assert_eq!(pool.available_mask(), 0b100);

        drop(first);
        assert_eq!(pool.available_mask(), 0b101);

        // Lowest index first.
        let again = pool.get().unwrap();
        assert_eq!(pool.available_mask(), 0b100);

        drop(second);
        drop(again);
        assert_eq!(pool.available_mask(), 0b111);
    }

    #[test]
    fn cloned_lease_returns_after_last_holder() {
        let pool = PicturePool::new(backing(1)).unwrap();

        let picture = pool.get().unwrap();
        let held = picture.clone();

        drop(picture);
        assert_eq!(pool.leased_count(), 1);

        drop(held);
        assert_eq!(pool.leased_count(), 0);
    }

    #[test]
    fn reset_reclaims_forgotten_pictures() {
        let pool = PicturePool::new(backing(4)).unwrap();

        std::mem::forget(pool.get().unwrap());
        std::mem::forget(pool.get().unwrap());
        let kept = pool.get().unwrap();
        drop(kept);

        assert_eq!(pool.reset(), 2);
        assert_eq!(pool.available_mask(), 0b1111);
        assert_eq!(pool.reset(), 0);
    }

    #[test]
    fn teardown_waits_for_outstanding_leases() {
        let pictures = backing(2);
        let observer = pictures[1].clone();
        let pool = PicturePool::new(pictures).unwrap();

        let leased = pool.get().unwrap();
        drop(pool);

        // The pool still holds the backing pictures while a lease is outstanding.
        assert_eq!(observer.ref_count(), 2);
        leased.planes()[0].write()[0] = 1;

        drop(leased);
        assert_eq!(observer.ref_count(), 1);
    }

    #[test]
    fn teardown_releases_backing_pictures() {
        let pictures = backing(3);
        let observers = pictures.iter().map(Picture::clone).collect::<Vec<_>>();

        let pool = PicturePool::new(pictures).unwrap();
        assert!(observers.iter().all(|p| p.ref_count() == 2));

        drop(pool);
        assert!(observers.iter().all(|p| p.ref_count() == 1));
    }

    #[test]
    fn teardown_frees_pool_storage() {
        let pool = PicturePool::new(backing(2)).unwrap();
        let shared = Arc::downgrade(&pool.shared);

        let leased = pool.get().unwrap();
        drop(pool);
        assert!(shared.upgrade().is_some());

        drop(leased);
        assert!(shared.upgrade().is_none());
    }

    #[test]
    fn failing_lock_hook_skips_slot() {
        let pool = PicturePool::builder()
            .pictures(backing(3))
            .lock_hook({
                let attempts = AtomicUsize::new(0);
                move |_| {
                    // Refuse only the very first attempt, which targets slot 0.
                    if attempts.fetch_add(1, Ordering::Relaxed) == 0 {
                        Err(HookError::new("surface busy"))
                    } else {
                        Ok(())
                    }
                }
            })
            .build()
            .unwrap();

        let picture = pool.get().unwrap();

        assert_eq!(pool.available_mask(), 0b101);
        assert_eq!(pool.shared.state.lock().refs, 2);
        drop(picture);
    }

    #[test]
    fn always_failing_lock_hook_exhausts_pool() {
        let pool = PicturePool::builder()
            .pictures(backing(3))
            .lock_hook(|_| Err(HookError::new("device lost")))
            .build()
            .unwrap();

        assert!(pool.get().is_none());
        assert!(pool.get().is_none());

        assert_eq!(pool.available_mask(), 0b111);
        assert_eq!(pool.shared.state.lock().refs, 1);
    }

    #[test]
    fn hooks_run_outside_the_pool_lock() {
        let shared = Arc::new(OnceLock::<Weak<PoolShared>>::new());
        let lock_calls = Arc::new(AtomicUsize::new(0));
        let unlock_calls = Arc::new(AtomicUsize::new(0));

        let pool = PicturePool::builder()
            .pictures(backing(2))
            .lock_hook({
                let shared = Arc::clone(&shared);
                let lock_calls = Arc::clone(&lock_calls);
                move |picture| {
                    let pool = shared.get().and_then(Weak::upgrade).unwrap();
                    assert!(pool.state.try_lock().is_some());
                    assert_eq!(picture.ref_count(), 0);
                    lock_calls.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            })
            .unlock_hook({
                let shared = Arc::clone(&shared);
                let unlock_calls = Arc::clone(&unlock_calls);
                move |picture| {
                    let pool = shared.get().and_then(Weak::upgrade).unwrap();
                    assert!(pool.state.try_lock().is_some());
                    assert_eq!(picture.ref_count(), 0);
                    unlock_calls.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build()
            .unwrap();

        shared.set(Arc::downgrade(&pool.shared)).unwrap();

        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        assert_eq!(lock_calls.load(Ordering::Relaxed), 2);
        assert_eq!(unlock_calls.load(Ordering::Relaxed), 0);

        drop(first);
        drop(second);
        assert_eq!(lock_calls.load(Ordering::Relaxed), 2);
        assert_eq!(unlock_calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn enumerate_visits_every_slot_in_order() {
        let pictures = backing(3);
        let observers = pictures.iter().map(Picture::clone).collect::<Vec<_>>();
        let pool = PicturePool::new(pictures).unwrap();

        let leased = pool.get().unwrap();

        let mut visited = Vec::new();
        pool.enumerate(|picture| {
            let index = observers
                .iter()
                .position(|observer| observer.shares_pixels_with(picture))
                .unwrap();
            visited.push((index, picture.ref_count()));
        });

        assert_eq!(visited, vec![(0, 1), (1, 0), (2, 0)]);

        // Enumeration must not disturb the reference counts.
        assert_eq!(leased.ref_count(), 1);
        drop(leased);
        assert_eq!(pool.available_mask(), 0b111);
    }

    #[test]
    fn panicking_lock_hook_puts_slot_back() {
        let pictures = backing(2);
        let observers = pictures.iter().map(Picture::clone).collect::<Vec<_>>();

        let pool = PicturePool::builder()
            .pictures(pictures)
            .lock_hook({
                let panicked = AtomicBool::new(false);
                move |_| {
                    assert!(panicked.swap(true, Ordering::Relaxed), "device disappeared");
                    Ok(())
                }
            })
            .build()
            .unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| pool.get()));
        assert!(result.is_err());

        assert_eq!(pool.available_mask(), 0b11);
        assert_eq!(pool.leased_count(), 0);
        assert_eq!(pool.shared.state.lock().refs, 1);

        // The slot the hook panicked on is leased first once the hook recovers.
        let picture = pool.get().unwrap();
        assert!(picture.shares_pixels_with(&observers[0]));
        drop(picture);

        drop(pool);
        assert!(observers.iter().all(|p| p.ref_count() == 1));
    }

    #[test]
    fn panicking_unlock_hook_still_returns_slot() {
        let pictures = backing(2);
        let observers = pictures.iter().map(Picture::clone).collect::<Vec<_>>();

        let pool = PicturePool::builder()
            .pictures(pictures)
            .unlock_hook(|_| panic!("device disappeared"))
            .build()
            .unwrap();

        let picture = pool.get().unwrap();
        let result = panic::catch_unwind(AssertUnwindSafe(move || drop(picture)));
        assert!(result.is_err());

        assert_eq!(pool.available_mask(), 0b11);
        assert_eq!(pool.shared.state.lock().refs, 1);

        drop(pool);
        assert!(observers.iter().all(|p| p.ref_count() == 1));
    }

    #[test]
    fn panicking_enumerate_visitor_leaves_pool_usable() {
        let pool = PicturePool::new(backing(2)).unwrap();

        // Idle pictures have no holders, so cloning one is refused.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pool.enumerate(|picture| drop(picture.clone()));
        }));
        assert!(result.is_err());

        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        assert_eq!(first.ref_count(), 1);
        assert_eq!(second.ref_count(), 1);
        assert_eq!(pool.available_mask(), 0);
    }

    #[test]
    #[should_panic(expected = "already available")]
    fn returning_a_slot_twice_panics() {
        let pool = PicturePool::new(backing(1)).unwrap();

        let picture = pool.get().unwrap();
        pool.shared.return_slot(0, &picture);
        // Its slot was just returned on its behalf.
        std::mem::forget(picture);

        let stale = UnarmedPicture::new(&pool.shared.slots[0]);
        pool.shared.return_slot(0, &stale);
    }
}

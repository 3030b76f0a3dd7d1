//! Metrics for picture pools.
//!
//! The events are counters shared by all pools in the process. They use per-thread event
//! instances to minimize contention between threads leasing and returning pictures.

use nm::Event;

thread_local! {
    /// A picture was successfully leased from a pool.
    pub(crate) static LEASES: Event = Event::builder()
        .name("picture_pool_leases")
        .build();

    /// A lease attempt found no available picture.
    pub(crate) static EXHAUSTED: Event = Event::builder()
        .name("picture_pool_exhausted")
        .build();

    /// A leased picture was returned to its pool.
    pub(crate) static RETURNS: Event = Event::builder()
        .name("picture_pool_returns")
        .build();

    /// A lock hook refused a slot, which was then skipped.
    pub(crate) static LOCK_HOOK_FAILURES: Event = Event::builder()
        .name("picture_pool_lock_hook_failures")
        .build();

    /// Number of pictures reclaimed by one forced drain of a pool.
    pub(crate) static RESET_RECLAIMED: Event = Event::builder()
        .name("picture_pool_reset_reclaimed")
        .build();
}

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-capacity pool of reusable video pictures.
//!
//! Decoders, filters and renderers often need a new picture for every frame. Allocating and
//! freeing pixel memory at that rate is expensive, and some pictures (e.g. hardware decoder
//! surfaces) cannot be allocated on demand at all. This crate provides [`PicturePool`], which
//! lends out pictures from a fixed set and takes them back when consumers are done with them.
//!
//! # Key features
//!
//! - **Zero-copy leasing**: Leased pictures alias the pixel memory of the backing pictures the
//!   pool was created from; nothing is allocated or copied per lease.
//! - **Automatic return**: [`Picture`] is reference counted. When the last handle to a leased
//!   picture is dropped, the picture goes back to its pool instead of being freed.
//! - **Backpressure, not blocking**: [`PicturePool::get()`] returns `None` when every picture is
//!   leased. It never waits.
//! - **Hardware hooks**: Optional lock/unlock hooks run when pictures are leased and returned,
//!   always without any pool lock held, so they may block on slow device calls.
//! - **Sub-pools**: [`PicturePool::reserve()`] carves a dedicated pool out of a master pool.
//! - **Forced drain**: [`PicturePool::reset()`] reclaims every leased picture at once.
//!
//! # Example
//!
//! ```rust
//! use picture_pool::{Chroma, PicturePool, VideoFormat};
//!
//! let format = VideoFormat::new(Chroma::I420, 1280, 720);
//! let pool = PicturePool::from_format(&format, 3).unwrap();
//!
//! let frame = pool.get().expect("a fresh pool has available pictures");
//! frame.planes()[0].write().fill(0x10);
//!
//! // Share the frame with a renderer; the pool gets it back once both are done.
//! let for_renderer = frame.clone();
//! drop(frame);
//! assert_eq!(pool.leased_count(), 1);
//!
//! drop(for_renderer);
//! assert_eq!(pool.leased_count(), 0);
//! ```
//!
//! # Capacity
//!
//! A pool holds at most [`MAX_CAPACITY`] pictures. Larger configurations are rejected with
//! [`Error::CapacityExceeded`].
//!
//! # Observability
//!
//! Pools log their lifecycle via `tracing` (construction, teardown and resets at debug level,
//! individual leases and returns at trace level) and count leases, returns, exhaustion and
//! hook failures as `nm` events named `picture_pool_*`.

mod builder;
mod error;
mod format;
mod metrics;
mod picture;
mod pool;
mod slot_mask;

pub use builder::*;
pub use error::{Error, HookError};
pub(crate) use error::Result;
pub use format::*;
pub use picture::{Finalize, Picture, Plane};
pub(crate) use picture::{PictureCore, UnarmedPicture};
pub use pool::PicturePool;
pub(crate) use pool::{LockHook, UnlockHook};
pub use slot_mask::MAX_CAPACITY;
pub(crate) use slot_mask::{SlotMask, check_capacity};

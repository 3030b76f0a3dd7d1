//! Basic usage of the `picture_pool` crate:
//!
//! * Creating a pool of pictures for a video format.
//! * Leasing pictures until the pool runs dry.
//! * Returning pictures by dropping them.
//! * Reserving a dedicated sub-pool for one consumer.

use picture_pool::{Chroma, PicturePool, VideoFormat};

fn main() {
    let format = VideoFormat::new(Chroma::I420, 320, 240);
    let pool = PicturePool::from_format(&format, 4).expect("320x240 I420 is a valid format");

    println!("Created a pool of {} {format} pictures", pool.size());

    // A decoder leases pictures to decode into. Leasing never blocks: when every picture is
    // in use, the pool says so and the decoder has to wait for the pipeline to drain.
    let mut in_flight = Vec::new();
    while let Some(picture) = pool.get() {
        picture.planes()[0].write().fill(0x80);
        in_flight.push(picture);
    }

    println!(
        "Leased {} pictures, availability mask is now {:#06b}",
        in_flight.len(),
        pool.available_mask()
    );

    // The renderer is done with the oldest picture. Dropping it returns it to the pool.
    drop(in_flight.remove(0));
    println!("After returning one: {:#06b}", pool.available_mask());
    drop(in_flight);

    // A filter stage wants two pictures that nobody else can take from it.
    let reserved = PicturePool::reserve(&pool, 2).expect("the pool has two available pictures");
    println!(
        "Reserved a sub-pool of {}; the main pool now has {} pictures leased",
        reserved.size(),
        pool.leased_count()
    );

    drop(reserved);
    println!(
        "Dropped the sub-pool; the main pool now has {} pictures leased",
        pool.leased_count()
    );
}

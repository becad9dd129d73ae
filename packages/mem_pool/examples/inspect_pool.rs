//! Demonstrates how allocations, frees and coalescing shape the regions of a pool.
//!
//! Opens one pool, fills it with allocations of increasing size, frees every other one and
//! then fills the resulting gaps again, printing the regions of the pool after every phase.
//!
//! Run with `RUST_LOG=mem_pool=trace` to also see the events emitted by the pool store.

#![allow(
    clippy::arithmetic_side_effects,
    reason = "example code with small values"
)]

use argh::FromArgs;
use mem_pool::{AllocError, Policy, PoolHandle, PoolStore};
use tracing_subscriber::EnvFilter;

/// Opens a memory pool and prints its regions as allocations come and go.
#[derive(FromArgs)]
struct Args {
    /// size of the pool in bytes
    #[argh(option, default = "10_000")]
    size: usize,

    /// placement policy of the pool (first-fit, best-fit)
    #[argh(option, default = "Policy::FirstFit")]
    policy: Policy,

    /// number of allocations to make
    #[argh(option, default = "10")]
    allocs: usize,
}

fn main() -> Result<(), AllocError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Args = argh::from_env();

    let mut store = PoolStore::new();
    store.init()?;

    let pool = store.open_pool(args.size, args.policy)?;

    println!("Opened a {} pool of {} bytes", args.policy, args.size);
    print_pool(&store, pool)?;

    let mut live = Vec::with_capacity(args.allocs);

    for index in 1..=args.allocs {
        match store.allocate(pool, index * 100) {
            Ok(alloc) => live.push(alloc),
            Err(AllocError::NoSuitableGap { requested }) => {
                println!("No room left for {requested} bytes, stopping");
                break;
            }
            Err(error) => return Err(error),
        }
    }

    println!("After {} allocations", live.len());
    print_pool(&store, pool)?;

    let mut kept = Vec::with_capacity(live.len());

    for (index, alloc) in live.into_iter().enumerate() {
        if index % 2 == 0 {
            store.free(pool, alloc)?;
        } else {
            kept.push(alloc);
        }
    }

    let mut live = kept;

    println!("After freeing every other allocation");
    print_pool(&store, pool)?;

    // Small requests show which gap the policy prefers.
    for size in [50, 150, 250] {
        if let Ok(alloc) = store.allocate(pool, size) {
            println!(
                "Allocated {size} bytes at offset {}",
                store.allocation_offset(pool, alloc)?
            );
            live.push(alloc);
        }
    }

    println!("After refilling");
    print_pool(&store, pool)?;

    for alloc in live {
        store.free(pool, alloc)?;
    }

    println!("After freeing everything");
    print_pool(&store, pool)?;

    store.close_pool(pool)?;
    store.shutdown()?;

    Ok(())
}

fn print_pool(store: &PoolStore, pool: PoolHandle) -> Result<(), AllocError> {
    let info = store.pool_info(pool)?;

    println!(
        "  {} bytes allocated in {} allocation(s), {} gap(s)",
        info.alloc_size(),
        info.num_allocs(),
        info.num_gaps()
    );

    for segment in store.inspect(pool)? {
        println!("  {segment}");
    }

    println!();

    Ok(())
}

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::ThreadPool;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use std::sync::OnceLock;

/// Crate-local Rayon pool used for column-parallel decode.
///
/// The global Rayon pool panics on first use if it cannot be initialized; a local pool lets
/// callers fall back to sequential decode instead.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
static RAYON_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
fn build_rayon_pool() -> Option<ThreadPool> {
    let requested = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let try_build = |n| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("tickframe-decode-{i}"))
            .build()
    };

    match try_build(requested) {
        Ok(pool) => Some(pool),
        Err(err) if requested > 1 => {
            log::warn!("falling back to a single decode thread: {err}");
            try_build(1).ok()
        }
        Err(err) => {
            log::warn!("decode thread pool unavailable, decoding sequentially: {err}");
            None
        }
    }
}

/// The crate-local Rayon pool, if one could be created.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
pub(crate) fn rayon_pool() -> Option<&'static ThreadPool> {
    RAYON_POOL.get_or_init(build_rayon_pool).as_ref()
}

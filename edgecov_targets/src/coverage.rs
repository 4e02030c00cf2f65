//! Coverage map state as static muts, and the probe entry point.

use core::{mem, ptr};
use std::env;

use ctor::ctor;
use edgecov::coverage::{edge_index, DEFAULT_SHM_PATH, MAP_SIZE, SHM_ENV_PATH};
use edgecov_bolts::shmem::{shm_key_for_path, SysvShMem};

/// The private fallback map, used when no shared segment can be attached.
/// Coverage recorded here is invisible to an external supervisor.
pub static mut LOCAL_COVERAGE_MAP: [u8; MAP_SIZE] = [0; MAP_SIZE];

/// Pointer to the live coverage map: the shared segment when attached,
/// else [`LOCAL_COVERAGE_MAP`]. Null until initialization ran.
pub static mut COVERAGE_MAP_PTR: *mut u8 = ptr::null_mut();

/// The previous-location register of the 2-gram edge hash.
///
/// Process-global and deliberately unsynchronized: in a multi-threaded
/// target, edges may be attributed to another thread's previous site.
/// The resulting signal is an approximation, an accepted limitation of
/// the probe ABI, not a defect.
pub static mut PREV_LOC: u32 = 0;

/// Attach the shared coverage map before `main` runs. Never fatal: any
/// failure degrades to process-local coverage.
#[ctor]
fn init() {
    unsafe {
        init_coverage_map();
    }
}

unsafe fn init_coverage_map() {
    let path = env::var(SHM_ENV_PATH).unwrap_or_else(|_| DEFAULT_SHM_PATH.into());
    match shm_key_for_path(&path).and_then(|key| SysvShMem::attach(key, MAP_SIZE)) {
        Ok(mut shmem) => {
            shmem.fill(0);
            COVERAGE_MAP_PTR = shmem.as_mut_ptr();
            // the mapping lives as long as the process, the OS detaches at exit
            mem::forget(shmem);
            eprintln!("edgecov: shared coverage map attached ({MAP_SIZE} bytes)");
        }
        Err(err) => {
            // no logger can be assumed inside an arbitrary target, report on stderr
            eprintln!("edgecov: no shared coverage map ({err}); degrading to process-local coverage");
            COVERAGE_MAP_PTR = (&raw mut LOCAL_COVERAGE_MAP).cast::<u8>();
            ptr::write_bytes(COVERAGE_MAP_PTR, 0, MAP_SIZE);
        }
    }
}

/// The probe. Instrumented code calls this at every block entry with the
/// block's edge id; consecutive ids are hashed pairwise into the map, so
/// the bits observed are *edges* between instrumented sites.
///
/// # Safety
/// Writes through the process-global map pointer. Initialization runs as
/// a constructor before `main`, so instrumented code can always call this;
/// calling it from handwritten code before initialization is a no-op.
#[no_mangle]
pub unsafe extern "C" fn __edgecov_hit(cur_loc: u32) {
    let map = COVERAGE_MAP_PTR;
    if map.is_null() {
        return;
    }
    let idx = edge_index(PREV_LOC, cur_loc);
    *map.add(idx >> 3) |= 1 << (idx & 7);
    PREV_LOC = cur_loc;
}

//! SysV shared memory, keyed off a filesystem path token, so the supervisor
//! and every instrumented target can rendezvous on the same coverage segment.

use core::{
    fmt::{self, Display},
    ops::{Deref, DerefMut},
    ptr, slice,
};
use std::{ffi::CString, os::unix::ffi::OsStrExt, path::Path};

use libc::{key_t, shmat, shmctl, shmdt, shmget};
use nix::errno::Errno;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Project id byte fed to `ftok` when deriving a segment key from a path.
pub const SHM_PROJECT_ID: libc::c_int = b'R' as libc::c_int;

/// The id of a [`SysvShMem`] mapping, the raw SysV segment id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShMemId(i32);

impl ShMemId {
    /// Create a [`ShMemId`] from an int
    #[must_use]
    pub fn from_int(val: i32) -> Self {
        Self(val)
    }

    /// The raw segment id
    #[must_use]
    pub fn as_int(&self) -> i32 {
        self.0
    }
}

impl Display for ShMemId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the SysV key for the segment named by `path`.
/// The path must exist, `ftok` resolves it to an inode.
pub fn shm_key_for_path<P: AsRef<Path>>(path: P) -> Result<key_t, Error> {
    let path = path.as_ref();
    let c_path = CString::new(path.as_os_str().as_bytes())?;
    let key = unsafe { libc::ftok(c_path.as_ptr(), SHM_PROJECT_ID) };
    if key == -1 {
        return Err(Error::last_os_error(format!(
            "ftok failed for shm path token `{}`",
            path.display()
        )));
    }
    Ok(key)
}

/// A SysV shared memory mapping, using `shmget`/`shmat`.
///
/// [`Drop`] only ever detaches: an attached reader going out of scope must
/// not destroy a segment it does not own. Destruction is the explicit,
/// one-shot [`SysvShMem::remove`].
#[derive(Debug)]
pub struct SysvShMem {
    id: ShMemId,
    map: *mut u8,
    map_size: usize,
    removed: bool,
}

impl SysvShMem {
    /// Create (or reuse) the segment for `key` and attach it.
    pub fn create(key: key_t, map_size: usize) -> Result<Self, Error> {
        unsafe {
            let os_id = shmget(key, map_size, libc::IPC_CREAT | 0o666);
            if os_id < 0 {
                return Err(Error::last_os_error(format!(
                    "Failed to allocate a shared mapping of size {map_size} for key {key:#x} - check OS limits (i.e shmall, shmmax)"
                )));
            }
            Self::attach_id(ShMemId::from_int(os_id), map_size)
        }
    }

    /// Attach the existing segment for `key`. Fails if no segment exists.
    pub fn attach(key: key_t, map_size: usize) -> Result<Self, Error> {
        unsafe {
            let os_id = shmget(key, map_size, 0);
            if os_id < 0 {
                return Err(Error::last_os_error(format!(
                    "No shared mapping found for key {key:#x}"
                )));
            }
            Self::attach_id(ShMemId::from_int(os_id), map_size)
        }
    }

    unsafe fn attach_id(id: ShMemId, map_size: usize) -> Result<Self, Error> {
        let map = shmat(id.as_int(), ptr::null(), 0) as *mut u8;

        if map as isize == -1 || map.is_null() {
            return Err(Error::last_os_error(format!(
                "Failed to map the shared mapping with id {id}"
            )));
        }

        Ok(Self {
            id,
            map,
            map_size,
            removed: false,
        })
    }

    /// The id of this mapping
    #[must_use]
    pub fn id(&self) -> ShMemId {
        self.id
    }

    /// The size of this mapping
    #[must_use]
    pub fn len(&self) -> usize {
        self.map_size
    }

    /// Whether this mapping is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map_size == 0
    }

    /// Detach the mapping. A second call is a no-op; failures are logged,
    /// never fatal, so the normal-exit and interrupt-exit teardown paths
    /// may both run.
    pub fn detach(&mut self) {
        if !self.map.is_null() {
            unsafe {
                if shmdt(self.map as *mut _) != 0 {
                    log::warn!("shmdt failed for segment {}: {}", self.id, Errno::last());
                }
            }
            self.map = ptr::null_mut();
        }
    }

    /// Remove the segment from the system. One-shot like [`Self::detach`];
    /// an error from the OS (segment already gone) is logged and swallowed.
    pub fn remove(&mut self) {
        if !self.removed {
            self.removed = true;
            unsafe {
                if shmctl(self.id.as_int(), libc::IPC_RMID, ptr::null_mut()) != 0 {
                    log::warn!(
                        "shmctl(IPC_RMID) failed for segment {}: {}",
                        self.id,
                        Errno::last()
                    );
                }
            }
        }
    }
}

impl Deref for SysvShMem {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        if self.map.is_null() {
            // detached mapping reads as empty
            return &[];
        }
        unsafe { slice::from_raw_parts(self.map, self.map_size) }
    }
}

impl DerefMut for SysvShMem {
    fn deref_mut(&mut self) -> &mut [u8] {
        if self.map.is_null() {
            return &mut [];
        }
        unsafe { slice::from_raw_parts_mut(self.map, self.map_size) }
    }
}

impl Drop for SysvShMem {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;

    use serial_test::serial;

    use super::{shm_key_for_path, SysvShMem};
    use crate::Error;

    fn touch_token() -> std::path::PathBuf {
        let path = std::env::temp_dir().join("edgecov_bolts_shmem_test");
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        path
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_shmem_create_attach() -> Result<(), Error> {
        let key = shm_key_for_path(touch_token())?;
        let mut owner = SysvShMem::create(key, 1024)?;
        owner.fill(0);
        owner[0] = 1;

        let reader = SysvShMem::attach(key, 1024)?;
        assert_eq!(1, reader[0]);
        drop(reader);

        owner.remove();
        Ok(())
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_shmem_teardown_is_idempotent() -> Result<(), Error> {
        let key = shm_key_for_path(touch_token())?;
        let mut shmem = SysvShMem::create(key, 1024)?;
        shmem.detach();
        shmem.detach();
        assert!(shmem[..].is_empty());
        shmem.remove();
        shmem.remove();

        // the segment must no longer be obtainable by key
        assert!(SysvShMem::attach(key, 1024).is_err());
        Ok(())
    }
}

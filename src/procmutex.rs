//! Cross-process device mutex (spec §4.3): a POSIX shared-memory-backed,
//! process-shared, recursive `pthread_mutex_t` per device, with stale-lock
//! recovery. Grounded on the reference implementation's
//! `shared_mutex_init`/`shared_mutex_close` (third_party/shared_mutex).

use crate::error::{RsmiError, RsmiResult};
use crate::registry::Bdf;
use std::ffi::CString;
use std::mem::MaybeUninit;
use std::ptr;
use std::time::Duration;

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Deterministic, collision-free shared-memory object name for a device.
#[must_use]
pub fn shm_name(bdf: &Bdf) -> String {
    format!(
        "/rocm_smi_{:04x}_{:02x}_{:02x}_{:x}",
        bdf.domain, bdf.bus, bdf.device, bdf.function
    )
}

/// A mapped, process-shared recursive mutex guarding one device's sysfs
/// state across every process that links this library.
#[derive(Debug)]
pub struct DeviceMutex {
    ptr: *mut libc::pthread_mutex_t,
    shm_fd: libc::c_int,
    name: String,
    /// When set, a contended `lock()` returns `Busy` immediately instead of
    /// blocking — spec's `RESRV_TEST1` init flag, used by mutual-exclusion
    /// tests (P3).
    fail_fast: bool,
}

unsafe impl Send for DeviceMutex {}
unsafe impl Sync for DeviceMutex {}

impl DeviceMutex {
    /// Opens (creating if necessary) the shared mutex region for `bdf`.
    ///
    /// # Errors
    /// Returns `Busy` if a stale or still-held mutex cannot be acquired
    /// within the 5-second recovery window (spec §4.3); the region is never
    /// force-unlocked.
    pub fn open(bdf: &Bdf, fail_fast: bool) -> RsmiResult<Self> {
        let name = shm_name(bdf);
        let c_name = CString::new(name.clone()).map_err(|_| RsmiError::InvalidArgs)?;

        let mode = 0o666;
        let mut created = false;

        let mut fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, mode) };
        if fd < 0 {
            fd = unsafe {
                libc::shm_open(c_name.as_ptr(), libc::O_RDWR | libc::O_CREAT, mode)
            };
            created = true;
            if fd >= 0 {
                unsafe {
                    libc::fchmod(fd, mode);
                }
            }
        }
        if fd < 0 {
            return Err(RsmiError::from_io_access(std::io::Error::last_os_error()));
        }

        let size = std::mem::size_of::<libc::pthread_mutex_t>();
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            unsafe {
                libc::close(fd);
            }
            return Err(RsmiError::from_io_access(std::io::Error::last_os_error()));
        }

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            unsafe {
                libc::close(fd);
            }
            return Err(RsmiError::from_io_access(std::io::Error::last_os_error()));
        }

        let mutex_ptr = addr.cast::<libc::pthread_mutex_t>();

        if created {
            let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            unsafe {
                libc::pthread_mutexattr_init(attr.as_mut_ptr());
                let mut attr = attr.assume_init();
                libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
                libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_RECURSIVE);
                if libc::pthread_mutex_init(mutex_ptr, &attr) != 0 {
                    libc::munmap(addr, size);
                    libc::close(fd);
                    return Err(RsmiError::Internal("pthread_mutex_init failed".into()));
                }
            }
        } else {
            // Stale-lock recovery: make sure a crashed prior holder didn't
            // leave this locked forever. We don't force-unlock a mutex held
            // by a live process — a timeout here just means "busy".
            let deadline = unsafe {
                let mut ts: libc::timespec = std::mem::zeroed();
                libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
                ts.tv_sec += LOCK_TIMEOUT.as_secs() as i64;
                ts
            };
            let ret = unsafe { libc::pthread_mutex_timedlock(mutex_ptr, &deadline) };
            if ret != 0 {
                log::warn!(
                    "device mutex {name} appears stale or held by a crashed process; \
                     if no rocm_smi process is running, delete /dev/shm{name}"
                );
                unsafe {
                    libc::munmap(addr, size);
                    libc::close(fd);
                }
                return Err(RsmiError::Busy);
            }
            unsafe {
                libc::pthread_mutex_unlock(mutex_ptr);
            }
        }

        Ok(Self {
            ptr: mutex_ptr,
            shm_fd: fd,
            name,
            fail_fast,
        })
    }

    /// Acquires the device mutex. Under `fail_fast`, contention returns
    /// `Busy` immediately; otherwise this blocks until available.
    pub fn lock(&self) -> RsmiResult<MutexGuardToken<'_>> {
        let ret = if self.fail_fast {
            unsafe { libc::pthread_mutex_trylock(self.ptr) }
        } else {
            unsafe { libc::pthread_mutex_lock(self.ptr) }
        };

        if ret != 0 {
            return Err(RsmiError::Busy);
        }
        Ok(MutexGuardToken { mutex: self })
    }

    /// Locks two device mutexes in ascending-index order to avoid deadlock
    /// on cross-device operations (spec §4.3, §5).
    pub fn lock_pair<'a>(
        first: &'a Self,
        first_index: usize,
        second: &'a Self,
        second_index: usize,
    ) -> RsmiResult<(MutexGuardToken<'a>, MutexGuardToken<'a>)> {
        if first_index <= second_index {
            let a = first.lock()?;
            let b = second.lock()?;
            Ok((a, b))
        } else {
            let b = second.lock()?;
            let a = first.lock()?;
            Ok((a, b))
        }
    }
}

impl Drop for DeviceMutex {
    fn drop(&mut self) {
        // Unmap and close, but never unlink: other live processes may still
        // be using this shared-memory object (spec §4.3 shutdown rule).
        unsafe {
            libc::munmap(
                self.ptr.cast(),
                std::mem::size_of::<libc::pthread_mutex_t>(),
            );
            libc::close(self.shm_fd);
        }
    }
}

/// RAII guard released on drop. Named distinctly from `std::sync::MutexGuard`
/// since this wraps a raw cross-process pthread mutex, not a Rust one.
#[must_use]
pub struct MutexGuardToken<'a> {
    mutex: &'a DeviceMutex,
}

impl Drop for MutexGuardToken<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.ptr);
        }
    }
}

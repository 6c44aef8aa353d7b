//! Process resource limits applied at startup.

use std::io;
use tracing::debug;

/// Niceness the driver runs at when lowering its priority
const NICE: libc::c_int = 10;

/// Lower CPU scheduling priority so indexing yields to the editor.
#[cfg(unix)]
pub fn lower_cpu_priority() -> io::Result<()> {
    // SAFETY: setpriority only reads its integer arguments.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, NICE) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    debug!(nice = NICE, "Lowered CPU priority");
    Ok(())
}

#[cfg(not(unix))]
pub fn lower_cpu_priority() -> io::Result<()> {
    Ok(())
}

/// Drop to the lowest best-effort I/O priority.
#[cfg(target_os = "linux")]
pub fn lower_io_priority() -> io::Result<()> {
    const IOPRIO_WHO_PROCESS: libc::c_int = 1;
    const IOPRIO_CLASS_BE: libc::c_int = 2;
    const IOPRIO_CLASS_SHIFT: libc::c_int = 13;
    let ioprio = (IOPRIO_CLASS_BE << IOPRIO_CLASS_SHIFT) | 7;

    // SAFETY: ioprio_set takes plain integers and touches no memory.
    let rc = unsafe { libc::syscall(libc::SYS_ioprio_set, IOPRIO_WHO_PROCESS, 0, ioprio) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    debug!(ioprio, "Lowered I/O priority");
    Ok(())
}

/// Not supported outside Linux.
#[cfg(not(target_os = "linux"))]
pub fn lower_io_priority() -> io::Result<()> {
    Ok(())
}

/// A `PROT_NONE` region of address space, mapped at startup and never
/// touched. It holds address space aside until released; it places no cap
/// on heap allocation. Unmapped on drop.
pub struct Reservation {
    ptr: *mut libc::c_void,
    len: usize,
}

// The mapping is PROT_NONE and never dereferenced.
unsafe impl Send for Reservation {}
unsafe impl Sync for Reservation {}

impl Reservation {
    /// Reserve `len` bytes. Zero reserves nothing.
    #[cfg(unix)]
    pub fn reserve(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Ok(Self::empty());
        }

        // SAFETY: an anonymous PROT_NONE mapping with no fixed address
        // cannot alias existing memory.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        debug!(bytes = len, "Reserved address space");
        Ok(Self { ptr, len })
    }

    #[cfg(not(unix))]
    pub fn reserve(_len: usize) -> io::Result<Self> {
        Ok(Self::empty())
    }

    fn empty() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            len: 0,
        }
    }

    /// Bytes currently reserved.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return the region to the system.
    pub fn release(&mut self) {
        if self.len == 0 {
            return;
        }
        unmap(self.ptr, self.len);
        debug!(bytes = self.len, "Released address space");
        self.ptr = std::ptr::null_mut();
        self.len = 0;
    }
}

#[cfg(unix)]
fn unmap(ptr: *mut libc::c_void, len: usize) {
    // SAFETY: `ptr`/`len` came from a successful mmap and are unmapped
    // exactly once.
    unsafe {
        libc::munmap(ptr, len);
    }
}

#[cfg(not(unix))]
fn unmap(_ptr: *mut libc::c_void, _len: usize) {}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_and_release() {
        let mut reservation = Reservation::reserve(8 * 1024 * 1024).unwrap();
        if cfg!(unix) {
            assert_eq!(reservation.len(), 8 * 1024 * 1024);
        }
        reservation.release();
        assert!(reservation.is_empty());
        reservation.release();
    }

    #[test]
    fn test_zero_reservation() {
        let reservation = Reservation::reserve(0).unwrap();
        assert!(reservation.is_empty());
    }
}

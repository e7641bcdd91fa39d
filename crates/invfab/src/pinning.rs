//! Core assignment and thread pinning.
//!
//! Workers get cores in an interleaved order: the upper half of the core
//! range first, alternating with the lower half, so siblings of a
//! hyper-threaded pair are handed out late. Pinning is Linux-only; other
//! platforms run unpinned.

/// Hands out core ids in interleaved order, wrapping around.
pub struct CoreAssignment {
    sequence: Vec<usize>,
    next: usize,
}

impl Default for CoreAssignment {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreAssignment {
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        CoreAssignment::with_cores(cores)
    }

    fn with_cores(cores: usize) -> Self {
        let half = cores / 2;
        let mut sequence = Vec::with_capacity(cores);
        for i in 0..half {
            sequence.push(half + i);
            sequence.push(i);
        }
        if cores % 2 == 1 {
            sequence.push(cores - 1);
        }
        if sequence.is_empty() {
            sequence.push(0);
        }
        CoreAssignment { sequence, next: 0 }
    }

    pub fn next_core(&mut self) -> usize {
        let core = self.sequence[self.next % self.sequence.len()];
        self.next += 1;
        core
    }
}

/// Pins the calling thread to `core`.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core: usize) {
    // SAFETY: cpu_set_t is a plain bitmask; sched_setaffinity only reads
    // it.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core, &mut set);
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            log::warn!("cannot pin thread to core {core}");
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_core: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved_sequence_covers_all_cores() {
        let mut ca = CoreAssignment::with_cores(8);
        let mut seen: Vec<usize> = (0..8).map(|_| ca.next_core()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_interleaving_starts_in_the_upper_half() {
        let mut ca = CoreAssignment::with_cores(8);
        assert_eq!(ca.next_core(), 4);
        assert_eq!(ca.next_core(), 0);
        assert_eq!(ca.next_core(), 5);
        assert_eq!(ca.next_core(), 1);
    }

    #[test]
    fn test_assignment_wraps() {
        let mut ca = CoreAssignment::with_cores(2);
        let first = ca.next_core();
        ca.next_core();
        assert_eq!(ca.next_core(), first);
    }
}

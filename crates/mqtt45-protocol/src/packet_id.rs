use std::sync::atomic::{AtomicU16, Ordering};

/// Lock-free 16-bit packet identifier allocator.
///
/// Identifier 0 is reserved by the protocol, so the sequence runs
/// 1, 2, ... 65535 and wraps back to 1.
#[derive(Debug, Default)]
pub struct PacketIdAllocator {
    counter: AtomicU16,
}

impl PacketIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: AtomicU16::new(0),
        }
    }

    pub fn next(&self) -> u16 {
        let mut current = self.counter.load(Ordering::Relaxed);
        loop {
            let next = if current == u16::MAX { 1 } else { current + 1 };
            match self.counter.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_one() {
        let ids = PacketIdAllocator::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }

    #[test]
    fn test_wraps_to_one_never_zero() {
        let ids = PacketIdAllocator::new();
        ids.counter.store(u16::MAX - 1, Ordering::Relaxed);
        assert_eq!(ids.next(), u16::MAX);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }

    #[test]
    fn test_consecutive_allocations_differ() {
        let ids = PacketIdAllocator::new();
        let mut previous = ids.next();
        for _ in 0..70_000 {
            let current = ids.next();
            assert_ne!(current, previous);
            assert_ne!(current, 0);
            previous = current;
        }
    }
}

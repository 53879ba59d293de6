//! Revision clock.
//!
//! Revision is a namespace-wide commit sequence number. Every committed
//! mutation takes the next value; no two mutations share one. Revision 0
//! means "nothing committed yet".

/// Monotonic revision counter.
///
/// Only advanced from inside the registry's write critical section.
#[derive(Debug, Clone, Default)]
pub struct RevisionClock {
    current: u64,
}

impl RevisionClock {
    /// Create a clock at revision 0.
    pub fn new() -> Self {
        Self { current: 0 }
    }

    /// The last assigned revision.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Assign the next revision.
    pub fn next(&mut self) -> u64 {
        let prev = self.current;
        self.current = prev.saturating_add(1);
        debug_assert!(self.current > prev, "revision space exhausted");
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revisions_strictly_increase() {
        let mut clock = RevisionClock::new();
        assert_eq!(clock.current(), 0);
        assert_eq!(clock.next(), 1);
        assert_eq!(clock.next(), 2);
        assert_eq!(clock.current(), 2);
    }
}

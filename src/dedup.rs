//! Per-device sequence deduplication.
//!
//! A beacon repeats the same payload on every advertising interval until it
//! takes a new sample and bumps its 1-byte sequence counter. Consumers that
//! do real work per reading keep the last sequence seen for each device and
//! skip deliveries that did not change it.

use crate::mac_address::MacAddress;
use crate::reading::Reading;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Remembers the last sequence number seen per device.
///
/// Readings may be delivered from several tasks at once, so the map sits
/// behind a mutex and [`SequenceFilter::observe`] takes `&self`.
#[derive(Debug, Default)]
pub struct SequenceFilter {
    last_seen: Mutex<HashMap<MacAddress, u8>>,
}

impl SequenceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sequence` for `device` and report whether it differs from the
    /// previous one.
    ///
    /// The first sequence seen for a device is always new. Wraparound
    /// (255 followed by 0) is a change like any other.
    pub fn observe(&self, device: MacAddress, sequence: u8) -> bool {
        let mut last_seen = self
            .last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last_seen.insert(device, sequence) != Some(sequence)
    }

    /// [`SequenceFilter::observe`] for a decoded reading.
    pub fn is_new(&self, reading: &Reading) -> bool {
        self.observe(reading.device_id(), reading.sequence())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{OTHER_MAC, TEST_MAC, ep_reading, im_reading};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_first_sighting_is_new() {
        let filter = SequenceFilter::new();
        assert!(filter.observe(TEST_MAC, 0));
    }

    #[test]
    fn test_repeated_sequence_is_suppressed() {
        let filter = SequenceFilter::new();
        assert!(filter.observe(TEST_MAC, 42));
        assert!(!filter.observe(TEST_MAC, 42));
        assert!(!filter.observe(TEST_MAC, 42));
    }

    #[test]
    fn test_changed_sequence_passes() {
        let filter = SequenceFilter::new();
        assert!(filter.observe(TEST_MAC, 1));
        assert!(filter.observe(TEST_MAC, 2));
        // Going back is a change too.
        assert!(filter.observe(TEST_MAC, 1));
    }

    #[test]
    fn test_wraparound_passes() {
        let filter = SequenceFilter::new();
        assert!(filter.observe(TEST_MAC, 255));
        assert!(filter.observe(TEST_MAC, 0));
        assert!(!filter.observe(TEST_MAC, 0));
    }

    #[test]
    fn test_devices_are_independent() {
        let filter = SequenceFilter::new();
        assert!(filter.observe(TEST_MAC, 7));
        assert!(filter.observe(OTHER_MAC, 7));
        assert!(!filter.observe(TEST_MAC, 7));
        assert!(!filter.observe(OTHER_MAC, 7));
    }

    #[test]
    fn test_is_new_uses_device_and_sequence() {
        let filter = SequenceFilter::new();
        assert!(filter.is_new(&Reading::Ep(ep_reading(3))));
        // Same device and sequence, whatever the layout.
        assert!(!filter.is_new(&Reading::Im(im_reading(3))));
        assert!(filter.is_new(&Reading::Im(im_reading(4))));
    }

    #[test]
    fn test_concurrent_duplicates_pass_once() {
        let filter = Arc::new(SequenceFilter::new());
        let passed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let filter = Arc::clone(&filter);
                let passed = Arc::clone(&passed);
                thread::spawn(move || {
                    for _ in 0..100 {
                        if filter.observe(TEST_MAC, 42) {
                            passed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(passed.load(Ordering::SeqCst), 1);
    }
}

//! Sentinel region scanner.
//!
//! Host code brackets each editable range with fixed 10-byte tags emitted at
//! compile time. The tags double as harmless instruction sequences (push /
//! push imm8 / mov reg, imm32 / pop / pop), so the marked function still
//! executes normally until it is patched:
//!
//! ```text
//! start:  57 6A 00 BF DE C0 ED FE 5F 5F   (byte 2 = function-local id)
//! end:    56 6A 45 BE DE C0 AD DE 5E 5E
//! stop:   52 6A 45 BA 5E EA 15 0D 5A 5A
//! ```
//!
//! The first byte of each tag is distinct, so a single byte decides which
//! tag a candidate match is for. [`scan`] walks forward from a function
//! entry, pairs start/end tags into [`Marker`]s keyed by the id byte, stops
//! at a stop-search tag, and caches the finished map per entry. Sentinels
//! live in code that is never relocated, so the cache never needs
//! invalidation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, warn};

use crate::disasm;

/// Length of every sentinel tag.
pub const TAG_LEN: usize = 10;

/// Marks the first payload byte of an editable region. Byte
/// [`START_TAG_FUNC_ID_INDEX`] is overwritten by the host with the region's
/// function-local id; it is captured, not compared.
pub const START_TAG: [u8; TAG_LEN] = [0x57, 0x6A, 0x00, 0xBF, 0xDE, 0xC0, 0xED, 0xFE, 0x5F, 0x5F];

/// Marks the first byte past a region's payload.
pub const END_TAG: [u8; TAG_LEN] = [0x56, 0x6A, 0x45, 0xBE, 0xDE, 0xC0, 0xAD, 0xDE, 0x5E, 0x5E];

/// Terminates the scan of a function.
pub const STOP_TAG: [u8; TAG_LEN] = [0x52, 0x6A, 0x45, 0xBA, 0x5E, 0xEA, 0x15, 0x0D, 0x5A, 0x5A];

/// Index of the id slot inside [`START_TAG`].
pub const START_TAG_FUNC_ID_INDEX: usize = 2;

/// A discovered region, before a descriptor is built for it.
///
/// `start` is the address of the first payload byte (just past the start
/// tag); `end` is the address of the end tag's first byte, i.e. one past the
/// last payload byte. Addresses are stored as `usize` so marker maps can be
/// shared process-wide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Marker {
    pub start: usize,
    pub end: usize,
    pub function_id: u8,
}

impl Marker {
    /// Address of the first payload byte.
    pub fn start_ptr(&self) -> *mut u8 {
        self.start as *mut u8
    }

    /// Address one past the last payload byte.
    pub fn end_ptr(&self) -> *mut u8 {
        self.end as *mut u8
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scanner tuning knobs.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// How far `seek` may run ahead of `base` before the scan gives up.
    /// The default is generous; a trip means the host's markers are broken.
    pub window: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { window: 4096 }
    }
}

/// Markers of one function, keyed by function-local id.
pub type MarkerMap = BTreeMap<u8, Marker>;

static MARKER_CACHE: OnceLock<Mutex<HashMap<usize, Arc<MarkerMap>>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<usize, Arc<MarkerMap>>> {
    MARKER_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Scans `function_entry` for sentinel-delimited regions, with the default
/// window.
///
/// # Safety
///
/// See [`scan_with`].
pub unsafe fn scan(function_entry: *const u8) -> Arc<MarkerMap> {
    scan_with(function_entry, &ScanConfig::default())
}

/// Scans `function_entry` for sentinel-delimited regions.
///
/// The result is cached per entry (keyed by the address as given, before
/// thunk resolution) and returned as a shared map; repeated scans of the
/// same entry hand back the same allocation. An aborted scan is *not*
/// cached, so the host can fix its markers and retry.
///
/// # Safety
///
/// `function_entry` must point at executable code of this process whose
/// bytes are readable from the (thunk-resolved) entry forward up to and
/// including a stop-search tag.
pub unsafe fn scan_with(function_entry: *const u8, config: &ScanConfig) -> Arc<MarkerMap> {
    let key = function_entry as usize;
    if let Some(hit) = cache().lock().unwrap().get(&key) {
        return Arc::clone(hit);
    }

    // Function pointers sometimes land on a trampoline rather than the body
    // that carries the tags.
    let entry = disasm::resolve_thunk(function_entry);

    match scan_markers(entry, config.window) {
        Some(markers) => {
            debug!(entry = key, regions = markers.len(), "scanned function");
            let markers = Arc::new(markers);
            let mut guard = cache().lock().unwrap();
            let cached = guard.entry(key).or_insert_with(|| Arc::clone(&markers));
            Arc::clone(cached)
        }
        None => {
            warn!(
                entry = key,
                window = config.window,
                "no conclusive tag match within the search window; check the host's markers"
            );
            Arc::new(MarkerMap::new())
        }
    }
}

/// The two-cursor tag matcher. `base` is the candidate match position,
/// `seek` the next byte to examine. Returns `None` if `seek` outruns `base`
/// by more than `window` without a conclusive match.
unsafe fn scan_markers(entry: *const u8, window: usize) -> Option<MarkerMap> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Tag {
        Start,
        End,
        Stop,
    }

    impl Tag {
        fn bytes(self) -> &'static [u8; TAG_LEN] {
            match self {
                Tag::Start => &START_TAG,
                Tag::End => &END_TAG,
                Tag::Stop => &STOP_TAG,
            }
        }
    }

    let mut markers = MarkerMap::new();
    let mut base = entry;
    let mut seek = entry;
    let mut target: Option<Tag> = None;
    let mut func_id = 0u8;
    // Latest fully matched start tag: (captured id, payload start address).
    let mut pending: Option<(u8, usize)> = None;

    loop {
        let offset = seek as usize - base as usize;
        if offset > window {
            return None;
        }

        let byte = *seek;

        let Some(tag) = target else {
            target = if byte == START_TAG[0] {
                Some(Tag::Start)
            } else if byte == END_TAG[0] {
                Some(Tag::End)
            } else if byte == STOP_TAG[0] {
                Some(Tag::Stop)
            } else {
                base = base.add(1);
                seek = base;
                continue;
            };
            seek = seek.add(1);
            continue;
        };

        // The id slot of the start tag holds host data, not a fixed byte.
        if tag == Tag::Start && offset == START_TAG_FUNC_ID_INDEX {
            func_id = byte;
            seek = seek.add(1);
            continue;
        }

        if byte == tag.bytes()[offset] {
            seek = seek.add(1);

            if offset < TAG_LEN - 1 {
                continue;
            }

            // Full match.
            match tag {
                Tag::Start => {
                    // Payload begins right after the tag. A newer start
                    // replaces an unclosed one: nested regions are not
                    // supported.
                    pending = Some((func_id, seek as usize));
                }
                Tag::End => {
                    // An end with nothing pending is stray host output and
                    // is skipped.
                    if let Some((id, start)) = pending.take() {
                        markers.insert(
                            id,
                            Marker {
                                start,
                                end: base as usize,
                                function_id: id,
                            },
                        );
                    }
                }
                Tag::Stop => break,
            }
        }

        // Mismatch, or a fully matched tag: resume one byte past base.
        target = None;
        base = base.add(1);
        seek = base;
    }

    Some(markers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_tag(id: u8) -> [u8; TAG_LEN] {
        let mut tag = START_TAG;
        tag[START_TAG_FUNC_ID_INDEX] = id;
        tag
    }

    fn image(parts: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::new();
        for part in parts {
            buf.extend_from_slice(part);
        }
        buf
    }

    const PAYLOAD_A: [u8; 6] = [0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3]; // mov eax, 42; ret
    const PAYLOAD_B: [u8; 3] = [0x90, 0x90, 0xC3];
    const FILLER: [u8; 4] = [0xCC, 0xCC, 0xCC, 0xCC];

    #[test]
    fn pairs_start_and_end_tags() {
        let buf = image(&[
            &FILLER,
            &start_tag(1),
            &PAYLOAD_A,
            &END_TAG,
            &FILLER,
            &start_tag(2),
            &PAYLOAD_B,
            &END_TAG,
            &STOP_TAG,
        ]);
        let base = buf.as_ptr() as usize;

        let markers = unsafe { scan_markers(buf.as_ptr(), 4096) }.unwrap();
        assert_eq!(markers.len(), 2);

        let first = &markers[&1];
        assert_eq!(first.function_id, 1);
        assert_eq!(first.start, base + FILLER.len() + TAG_LEN);
        assert_eq!(first.end, first.start + PAYLOAD_A.len());
        assert_eq!(first.len(), PAYLOAD_A.len());

        let second = &markers[&2];
        assert_eq!(
            second.start,
            first.end + TAG_LEN + FILLER.len() + TAG_LEN
        );
        assert_eq!(second.len(), PAYLOAD_B.len());
        assert!(first.start < second.start);
    }

    #[test]
    fn stop_tag_ends_the_scan() {
        // A decoy region beyond the stop tag must not be discovered.
        let buf = image(&[
            &start_tag(1),
            &PAYLOAD_B,
            &END_TAG,
            &STOP_TAG,
            &start_tag(3),
            &PAYLOAD_B,
            &END_TAG,
        ]);

        let markers = unsafe { scan_markers(buf.as_ptr(), 4096) }.unwrap();
        assert_eq!(markers.len(), 1);
        assert!(markers.contains_key(&1));
        assert!(!markers.contains_key(&3));
    }

    #[test]
    fn newer_start_discards_pending_start() {
        let buf = image(&[
            &start_tag(1),
            &FILLER,
            &start_tag(2),
            &PAYLOAD_B,
            &END_TAG,
            &STOP_TAG,
        ]);
        let base = buf.as_ptr() as usize;

        let markers = unsafe { scan_markers(buf.as_ptr(), 4096) }.unwrap();
        assert_eq!(markers.len(), 1);

        let marker = &markers[&2];
        assert_eq!(marker.start, base + TAG_LEN + FILLER.len() + TAG_LEN);
        assert_eq!(marker.len(), PAYLOAD_B.len());
    }

    #[test]
    fn end_without_start_is_skipped() {
        let buf = image(&[
            &END_TAG,
            &FILLER,
            &start_tag(7),
            &PAYLOAD_B,
            &END_TAG,
            &STOP_TAG,
        ]);

        let markers = unsafe { scan_markers(buf.as_ptr(), 4096) }.unwrap();
        assert_eq!(markers.len(), 1);
        assert!(markers.contains_key(&7));
    }

    #[test]
    fn duplicate_id_keeps_the_later_region() {
        let buf = image(&[
            &start_tag(5),
            &PAYLOAD_A,
            &END_TAG,
            &start_tag(5),
            &PAYLOAD_B,
            &END_TAG,
            &STOP_TAG,
        ]);
        let base = buf.as_ptr() as usize;

        let markers = unsafe { scan_markers(buf.as_ptr(), 4096) }.unwrap();
        assert_eq!(markers.len(), 1);

        let marker = &markers[&5];
        assert_eq!(
            marker.start,
            base + TAG_LEN + PAYLOAD_A.len() + TAG_LEN + TAG_LEN
        );
        assert_eq!(marker.len(), PAYLOAD_B.len());
    }

    #[test]
    fn window_trip_aborts_the_scan() {
        // With a tiny window, matching a tag runs seek past base far enough
        // to trip the fail-safe before anything commits.
        let buf = image(&[&start_tag(1), &STOP_TAG]);
        assert!(unsafe { scan_markers(buf.as_ptr(), 4) }.is_none());
    }

    #[test]
    fn scan_caches_per_entry() {
        // Leaked so the address stays unique for the lifetime of the
        // process-wide cache.
        let buf: &'static mut [u8] = Box::leak(
            image(&[&start_tag(9), &PAYLOAD_A, &END_TAG, &STOP_TAG]).into_boxed_slice(),
        );

        let first = unsafe { scan(buf.as_ptr()) };
        let second = unsafe { scan(buf.as_ptr()) };
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 1);
        assert_eq!(first[&9].len(), PAYLOAD_A.len());
    }

    #[test]
    fn aborted_scan_is_not_cached() {
        let buf: &'static mut [u8] =
            Box::leak(image(&[&start_tag(1), &STOP_TAG]).into_boxed_slice());

        let tight = ScanConfig { window: 4 };
        let aborted = unsafe { scan_with(buf.as_ptr(), &tight) };
        assert!(aborted.is_empty());

        // A retry with a sane window succeeds: nothing stale was cached.
        // (The region list is still empty here; the point is the scan runs
        // to the stop tag instead of replaying the aborted result.)
        let retried = unsafe { scan_with(buf.as_ptr(), &ScanConfig::default()) };
        assert!(retried.is_empty());
        let again = unsafe { scan_with(buf.as_ptr(), &ScanConfig::default()) };
        assert!(Arc::ptr_eq(&retried, &again));
    }
}

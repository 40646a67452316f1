//! Region descriptors and the discovery façade.
//!
//! [`build`] turns one function entry into a vector of [`HackableCode`]
//! descriptors, one per sentinel-delimited region. Each descriptor snapshots
//! the region's bytes at first observation, so any sequence of patches can
//! always be undone with [`restore`](HackableCode::restore).

use tracing::warn;

use crate::asm;
use crate::disasm;
use crate::error::{CompileError, ErrorKind};
use crate::mem::CodeRange;
use crate::scanner::{self, Marker};

const NOP: u8 = 0x90;

/// Builds a descriptor for every region discovered in `function_entry`.
///
/// Regions come back in function-local id order. Degenerate marker pairs
/// (empty payloads) are dropped.
///
/// # Safety
///
/// `function_entry` must satisfy the contract of [`scanner::scan`], and the
/// discovered regions must stay mapped for as long as the descriptors are
/// used.
pub unsafe fn build(function_entry: *const u8) -> Vec<HackableCode> {
    scanner::scan(function_entry)
        .values()
        .filter_map(|marker| unsafe { HackableCode::from_marker(marker) })
        .collect()
}

/// One editable region of the process image.
///
/// Holds the address and length of the region's payload, a snapshot of the
/// bytes as first observed, and the current and original assembly listings.
/// The region's memory itself belongs to the host image; the descriptor
/// only references it.
pub struct HackableCode {
    code: CodeRange,
    original_bytes: Box<[u8]>,
    original_text: String,
    current_text: String,
    last_error: Option<CompileError>,
}

impl HackableCode {
    /// Wraps the payload range `start..end`.
    ///
    /// Returns `None` for empty or inverted ranges.
    ///
    /// # Safety
    ///
    /// The range must be mapped, readable, and remain so for the lifetime
    /// of the descriptor.
    pub(crate) unsafe fn new(start: *mut u8, end: *mut u8) -> Option<Self> {
        let len = (end as usize).checked_sub(start as usize)?;
        if start.is_null() || len == 0 {
            return None;
        }

        let code = CodeRange::new(start, len);
        let original_bytes = code.snapshot().into_boxed_slice();
        let original_text = disasm::disassemble_bytes(&original_bytes, start as u64);

        Some(Self {
            code,
            original_bytes,
            current_text: original_text.clone(),
            original_text,
            last_error: None,
        })
    }

    unsafe fn from_marker(marker: &Marker) -> Option<Self> {
        Self::new(marker.start_ptr(), marker.end_ptr())
    }

    /// Address of the first payload byte.
    pub fn code_ptr(&self) -> *mut u8 {
        self.code.addr()
    }

    /// Payload length in bytes. Fixed for the lifetime of the region.
    pub fn original_len(&self) -> usize {
        self.code.len()
    }

    /// The assembly most recently applied (initially the original listing).
    pub fn current_text(&self) -> &str {
        &self.current_text
    }

    /// Disassembly of the region as first observed.
    pub fn original_text(&self) -> &str {
        &self.original_text
    }

    /// The bytes of the region as first observed.
    pub fn original_bytes(&self) -> &[u8] {
        &self.original_bytes
    }

    /// Why the last [`apply`](Self::apply) failed, if it did.
    pub fn last_error(&self) -> Option<&CompileError> {
        self.last_error.as_ref()
    }

    /// Re-assembles `new_text` at the region's address and writes it over
    /// the region, NOP-padded to the original length.
    ///
    /// Returns `false`, leaving the region's bytes, `current_text` and the
    /// snapshot untouched, if assembly fails or the produced code is larger
    /// than the region. The reason is retrievable via
    /// [`last_error`](Self::last_error).
    pub fn apply(&mut self, new_text: &str) -> bool {
        let produced = match asm::assemble(new_text, self.code.addr() as u64) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(code = ?self.code.addr(), error = %err, "patch rejected");
                self.last_error = Some(err);
                return false;
            }
        };

        if produced.len() > self.code.len() {
            let err = CompileError::new(ErrorKind::CodeTooLarge);
            warn!(
                code = ?self.code.addr(),
                produced = produced.len(),
                capacity = self.code.len(),
                "patch rejected"
            );
            self.last_error = Some(err);
            return false;
        }

        // Fill the slack with NOPs so the region stays valid code end to end.
        let mut bytes = produced;
        bytes.resize(self.code.len(), NOP);

        unsafe { self.code.write(&bytes) };

        self.current_text = new_text.to_string();
        self.last_error = None;
        true
    }

    /// Writes the construction-time snapshot back over the region and
    /// resets `current_text` to the original listing.
    pub fn restore(&mut self) {
        unsafe { self.code.write(&self.original_bytes) };
        self.current_text = self.original_text.clone();
        self.last_error = None;
    }
}

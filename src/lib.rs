//! # hackcode
//!
//! A runtime self-modifying code engine for the current process.
//!
//! ## Overview
//!
//! Host code marks editable ranges of its own machine code at compile time by
//! emitting fixed 10-byte sentinel tags around them (conventionally via
//! inline-assembly macros). At run time this crate:
//!
//! 1. Scans forward from a function entry point, pairing start/end tags into
//!    region markers (cached per entry, one thunk level resolved).
//! 2. Wraps each region in a [`HackableCode`] descriptor holding a snapshot
//!    of the original bytes and their disassembly.
//! 3. Lets the caller [`apply`](HackableCode::apply) replacement assembly
//!    (re-assembled on the fly at the patch site's address, size-checked
//!    against the region, NOP-padded to the original length) and
//!    [`restore`](HackableCode::restore) the snapshot at any time.
//!
//! ```no_run
//! let mut regions = unsafe { hackcode::build(some_function as usize as *const u8) };
//! for region in &mut regions {
//!     if region.apply("mov eax, 1\nret") {
//!         // region now executes the new code
//!     }
//!     region.restore();
//! }
//! # fn some_function() {}
//! ```
//!
//! The assembler and disassembler back-ends (Keystone and iced-x86) are
//! driven per call; the only process-wide state is the marker cache.
//!
//! Patching live code is inherently racy: the host must ensure no other
//! thread executes a region while it is being rewritten. 32-bit and 64-bit
//! x86 only.

#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

pub mod asm;
pub mod disasm;
pub mod error;
pub mod mem;
pub mod patch;
pub mod scanner;
pub mod text;

pub use error::{CompileError, CompileResult, ErrorKind};
pub use mem::CodeRange;
pub use patch::{build, HackableCode};
pub use scanner::{Marker, ScanConfig};

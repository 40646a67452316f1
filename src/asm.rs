//! Assembler adapter.
//!
//! Wraps the Keystone engine behind a stateless `text in, bytes out` call.
//! The source is pre-processed first: decimal float literals become the hex
//! rendering of their IEEE-754 single-precision bit pattern (the assembler
//! takes immediates, not floats, and the host wants `1.5f` to land as the
//! same 32 bits a `mov r/m32, imm32` would carry), and `//` line comments
//! are removed. Keystone has no comment syntax of its own (`;` is a
//! statement separator there), so removal is the only safe normalization.

use std::sync::OnceLock;

use hexpatch_keystone::{Arch, Keystone, Mode};
use regex::Regex;

use crate::error::{CompileError, CompileResult};
use crate::text;

fn float_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?[0-9]*\.[0-9]+f?").unwrap())
}

/// Rewrites float literals to `0x…` bit patterns and drops `//` comments.
pub fn preprocess(source: &str) -> String {
    let rewritten = float_literal_re().replace_all(source, |caps: &regex::Captures<'_>| {
        let literal = &caps[0];
        let number = text::trim_end_matches_ci(literal, "f");
        match number.parse::<f32>() {
            Ok(value) => text::to_hex(value.to_bits(), true),
            Err(_) => literal.to_string(),
        }
    });

    strip_line_comments(&rewritten)
}

fn strip_line_comments(source: &str) -> String {
    source
        .lines()
        .map(|line| match line.find("//") {
            Some(at) => &line[..at],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Assembles `source` as if it were located at `origin`, so that
/// position-dependent encodings (relative jumps and calls) come out correct
/// for the patch site.
///
/// The engine targets the process's native word size. Nothing is retained
/// between calls.
pub fn assemble(source: &str, origin: u64) -> CompileResult {
    let processed = preprocess(source);

    let mode = if cfg!(target_pointer_width = "64") {
        Mode::MODE_64
    } else {
        Mode::MODE_32
    };

    let engine = Keystone::new(Arch::X86, mode).map_err(backend_error)?;
    let output = engine.asm(processed, origin).map_err(backend_error)?;

    Ok(output.bytes)
}

fn backend_error(err: hexpatch_keystone::Error) -> CompileError {
    CompileError::from_backend_code(err.bits() as u32)
}

//! Disassembler adapter.
//!
//! Produces an Intel-syntax listing, one instruction per line, for a window
//! of process memory, then normalizes numeric literals: every `0x…` token
//! that is a pure hex integer is rewritten to decimal. The host displays and
//! re-assembles this text, and prefers readable immediates over hex. The
//! rewrite deliberately covers tokens inside memory expressions as well
//! (`[rax+0x10]` becomes `[rax+16]`).
//!
//! Also home to [`resolve_thunk`], which is just a disassembler trick: look
//! at the first instruction of a function and follow a single `jmp` to its
//! printed target to unwrap compiler-generated thunks and vtable
//! trampolines.

use std::sync::OnceLock;

use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter};
use regex::Regex;

use crate::text;

fn hex_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("0x[0-9a-fA-F]+").unwrap())
}

/// Disassembles `bytes` as if loaded at `ip`, in the process's native word
/// size. Each instruction becomes one newline-terminated line.
pub fn disassemble_bytes(bytes: &[u8], ip: u64) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    let bitness = if cfg!(target_pointer_width = "64") {
        64
    } else {
        32
    };
    let mut decoder = Decoder::with_ip(bitness, bytes, ip, DecoderOptions::NONE);

    let mut formatter = IntelFormatter::new();
    let options = formatter.options_mut();
    options.set_hex_prefix("0x");
    options.set_hex_suffix("");
    options.set_uppercase_hex(false);
    options.set_space_after_operand_separator(true);
    options.set_show_branch_size(false);
    options.set_branch_leading_zeros(false);

    let mut instruction = Instruction::default();
    let mut line = String::new();
    let mut listing = String::new();

    while decoder.can_decode() {
        decoder.decode_out(&mut instruction);
        line.clear();
        formatter.format(&instruction, &mut line);
        listing.push_str(&line);
        listing.push('\n');
    }

    decimalize_hex(&listing)
}

/// Disassembles `len` bytes of process memory at `addr`.
///
/// A null pointer or empty window yields an empty listing.
///
/// # Safety
///
/// `addr..addr + len` must be mapped and readable.
pub unsafe fn disassemble(addr: *const u8, len: usize) -> String {
    if addr.is_null() || len == 0 {
        return String::new();
    }
    disassemble_bytes(std::slice::from_raw_parts(addr, len), addr as u64)
}

/// Rewrites every pure-hex `0x…` token in `listing` to decimal.
fn decimalize_hex(listing: &str) -> String {
    let re = hex_token_re();
    if !re.is_match(listing) {
        return listing.to_string();
    }

    re.replace_all(listing, |caps: &regex::Captures<'_>| {
        let token = &caps[0];
        if text::is_hex_number(token) {
            text::hex_to_int(token).to_string()
        } else {
            token.to_string()
        }
    })
    .into_owned()
}

/// Follows a single leading `jmp <absolute>` at `entry`.
///
/// Compilers route some function pointers (incremental-linking thunks,
/// vtable trampolines) through a one-instruction forwarder. If the first
/// instruction at `entry` prints as `jmp <decimal>` the printed target is
/// returned; otherwise `entry` comes back unchanged. One level only; chains
/// are not followed.
///
/// # Safety
///
/// At least 5 readable bytes must be mapped at `entry`.
pub unsafe fn resolve_thunk(entry: *const u8) -> *const u8 {
    // 5 bytes covers jmp rel32, the only thunk shape that gets emitted.
    const PROBE_LEN: usize = 5;

    if entry.is_null() {
        return entry;
    }

    let listing = disassemble(entry, PROBE_LEN);
    let first = listing.lines().next().unwrap_or("");
    if !text::starts_with_ignore_case(first, "jmp ") {
        return entry;
    }

    let target = text::trim_start_matches_ci(first, "jmp ").trim();
    if !text::is_integer(target) {
        return entry;
    }

    match target.parse::<u64>() {
        Ok(addr) => addr as *const u8,
        Err(_) => entry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_is_one_instruction_per_line() {
        // mov eax, 42 ; ret
        let listing = disassemble_bytes(&[0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3], 0x1000);
        assert_eq!(listing, "mov eax, 42\nret\n");
    }

    #[test]
    fn hex_immediates_become_decimal() {
        // add eax, 0x10
        let listing = disassemble_bytes(&[0x83, 0xC0, 0x10], 0);
        assert_eq!(listing, "add eax, 16\n");
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn hex_inside_memory_expressions_becomes_decimal_too() {
        // mov rax, [rax+0x10]
        let listing = disassemble_bytes(&[0x48, 0x8B, 0x40, 0x10], 0);
        assert_eq!(listing, "mov rax, [rax+16]\n");
    }

    #[test]
    fn empty_window_yields_empty_listing() {
        assert_eq!(disassemble_bytes(&[], 0), "");
        assert_eq!(unsafe { disassemble(std::ptr::null(), 16) }, "");
        let buf = [0xC3u8];
        assert_eq!(unsafe { disassemble(buf.as_ptr(), 0) }, "");
    }

    #[test]
    fn decimalize_leaves_non_hex_alone() {
        assert_eq!(decimalize_hex("ret\n"), "ret\n");
        assert_eq!(decimalize_hex("mov eax, 0x2a\n"), "mov eax, 42\n");
    }

    #[test]
    fn thunk_is_followed_one_level() {
        // A 32-byte buffer whose first instruction is jmp +16 (rel32 = 11),
        // landing on a ret later in the same buffer.
        let mut buf = vec![0xCCu8; 32];
        buf[0] = 0xE9;
        buf[1..5].copy_from_slice(&11i32.to_le_bytes());
        buf[16] = 0xC3;

        let entry = buf.as_ptr();
        let resolved = unsafe { resolve_thunk(entry) };
        assert_eq!(resolved, unsafe { entry.add(16) });
    }

    #[test]
    fn non_jmp_entry_resolves_to_itself() {
        // push rdi / ret: no forwarding.
        let buf = [0x57u8, 0xC3, 0xCC, 0xCC, 0xCC];
        let entry = buf.as_ptr();
        assert_eq!(unsafe { resolve_thunk(entry) }, entry);
    }

    #[test]
    fn indirect_jmp_is_not_followed() {
        // jmp qword/dword ptr [0x...]: target is not a bare integer.
        let buf = [0xFF, 0x25, 0x00, 0x00, 0x00, 0x00];
        let entry = buf.as_ptr();
        assert_eq!(unsafe { resolve_thunk(entry) }, entry);
    }
}

//! Small text utilities shared by the assembly pre- and post-processors.
//!
//! Everything here is total: malformed input yields a neutral result (`false`
//! or `0`), never an error. The pre/post-processing pipelines run over
//! arbitrary user-typed assembly, so these helpers must not be the place
//! where a stray character turns into a panic.

/// ASCII case-insensitive prefix test.
pub fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// ASCII case-insensitive suffix test.
pub fn ends_with_ignore_case(s: &str, suffix: &str) -> bool {
    s.len() >= suffix.len()
        && s.as_bytes()[s.len() - suffix.len()..].eq_ignore_ascii_case(suffix.as_bytes())
}

/// Repeatedly strips `pat` from the front of `s`, case-insensitively.
///
/// An empty `pat` is returned unchanged rather than looping forever.
pub fn trim_start_matches_ci<'a>(s: &'a str, pat: &str) -> &'a str {
    let mut out = s;
    while !pat.is_empty() && starts_with_ignore_case(out, pat) {
        out = &out[pat.len()..];
    }
    out
}

/// Repeatedly strips `pat` from the back of `s`, case-insensitively.
pub fn trim_end_matches_ci<'a>(s: &'a str, pat: &str) -> &'a str {
    let mut out = s;
    while !pat.is_empty() && ends_with_ignore_case(out, pat) {
        out = &out[..out.len() - pat.len()];
    }
    out
}

/// Is `s` a decimal integer, optionally preceded by a single `-`?
pub fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Is `s` a `0x`-prefixed hexadecimal literal?
pub fn is_hex_number(s: &str) -> bool {
    match s.strip_prefix("0x") {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

/// Parses a hex literal (with or without a `0x` prefix) into a signed 64-bit
/// value. The bit pattern is taken verbatim, so `0xFFFFFFFFFFFFFFFF` comes
/// back as `-1`. Returns 0 if `s` is not a hex number or does not fit in 64
/// bits.
pub fn hex_to_int(s: &str) -> i64 {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map(|v| v as i64).unwrap_or(0)
}

/// Renders a 32-bit pattern as uppercase hex, optionally `0x`-prefixed.
pub fn to_hex(value: u32, prefixed: bool) -> String {
    if prefixed {
        format!("0x{value:X}")
    } else {
        format!("{value:X}")
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance identifier construction.
//!
//! Instance ids are built from session, pid, and time so a human reading
//! the runtime directory can tell at a glance which process owns which
//! file. Run and lock ids are opaque UUIDs minted where they are used.

/// Encode a number in lowercase base 36.
pub fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Generate a short random hex string.
pub fn short_rand(len: usize) -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..len)
        .map(|_| format!("{:x}", rng.random::<u8>() % 16))
        .collect()
}

/// Build an instance id: `sess-{session[:8]}-pid{pid}-{t36}-{rand4}`.
///
/// The session prefix ties the id to its originating session, the pid
/// makes liveness checks cheap, and the timestamp + random suffix keep
/// re-registrations from colliding.
pub fn instance_id(session_id: &str, pid: u32, now_ms: u64) -> String {
    let session_prefix: String = session_id.chars().take(8).collect();
    format!(
        "sess-{}-pid{}-{}-{}",
        session_prefix,
        pid,
        base36(now_ms),
        short_rand(4)
    )
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;

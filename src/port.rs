//! RPC port allocation
//!
//! Each attempt gets `base + index`. No probing for free ports: a server from a
//! failed attempt that is slow to die can never collide with the next one
//! because the next one always moves up a port.

/// Port used by attempt `index` (0-based).
///
/// `BootstrapConfig::validate` guarantees `base + max_attempts - 1` fits in a
/// `u16`, so the addition never wraps for a validated configuration.
pub fn port_for_attempt(base: u16, index: u32) -> u16 {
    (u32::from(base) + index) as u16
}

/// Largest attempt count that keeps every port of a run inside `u16`.
pub fn max_attempts_for_base(base: u16) -> u32 {
    u32::from(u16::MAX - base) + 1
}

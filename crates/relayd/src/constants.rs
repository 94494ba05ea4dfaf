/// Fixed egress datagram capacity in bytes.
pub const MTU: usize = 1450;

/// Upper bound on distinct metric names within one flush window; a valid
/// line cannot be shorter than [`MIN_LINE_LENGTH`] bytes.
pub const NUM_OF_SLOTS: usize = MTU / 7;

/// Worst-case serialized counter payload after the name: sign, fifteen
/// significant digits, decimal point, exponent and the trailing `|c\n`.
pub const MAX_COUNTER_LENGTH: usize = 32;

/// Number of buffers in the egress ring.
pub const DOWNSTREAM_BUF_NUM: usize = 16;

/// Flushes sent through one egress socket before it is replaced, bounding
/// the lifetime of any single ephemeral source port.
pub const MAX_PACKETS_PER_SOCKET: u64 = 1024;

/// Cap on resolved downstream addresses kept per refresh.
pub const MAX_DOWNSTREAM_NUM: usize = 32;

/// Shortest accepted line, terminating newline included.
pub const MIN_LINE_LENGTH: usize = 7;

/// Longest accepted line, newline included. The headroom below [`MTU`]
/// reserves room for a counter re-serialization that is longer than the
/// sampled token.
pub const MAX_LINE_LENGTH: usize = MTU - MAX_COUNTER_LENGTH;

/// Request written to a downstream's health port.
pub const HEALTH_REQUEST: &[u8] = b"health";

/// Expected prefix of a healthy probe response.
pub const HEALTH_RESPONSE: &[u8] = b"health: up\n";

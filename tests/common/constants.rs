//! Shared constants for end-to-end tests
//!
//! When test data or timing changes, update only this file.
#![allow(dead_code)]

// ============================================================================
// Test Blobs
// ============================================================================

/// Minimal PNG header, sniffed as `image/png`
pub const PNG_BLOB: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01\x00\x00\x00\x01";

/// ID3-tagged payload, sniffed as `audio/mpeg`
pub const MP3_BLOB: &[u8] =
    b"ID3\x03\x00\x00\x00\x00\x00\x0a\x00\x00\x00\x00\x00\x00end-to-end test audio payload";

/// Minimal WAV header, sniffed as `audio/x-wav`
pub const WAV_BLOB: &[u8] =
    b"RIFF\x24\x00\x00\x00WAVEfmt \x10\x00\x00\x00\x01\x00\x01\x00\x44\xac\x00\x00";

/// Bytes no sniffer recognizes
pub const TEXT_BLOB: &[u8] = b"just some plain bytes that are not audio";

// ============================================================================
// Cluster Identities
// ============================================================================

/// Signer id of the node at `index`
pub fn signer_id(index: usize) -> String {
    format!("test-node-{}", index)
}

/// Shared secret of the node at `index`
pub fn signer_secret(index: usize) -> String {
    format!("test-secret-{}", index)
}

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between server readiness checks (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

/// Default request timeout for test client (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Peer probe timeout used by test nodes (milliseconds)
pub const PEER_PROBE_TIMEOUT_MS: u64 = 1000;

//! Storage constants and tuning parameters.
//!
//! Defaults follow what mainstream clients ship with; every limit here can be
//! overridden at construction time.

// ============================================================================
// Transfer granularity
// ============================================================================

/// Size of a block, the unit of a peer request (BEP-3 convention: 16 KiB).
pub const BLOCK_SIZE: u32 = 16384;

// ============================================================================
// Handle cache
// ============================================================================

/// Default cap on concurrently open file handles across all torrents.
pub const DEFAULT_MAX_OPEN_FILES: usize = 196;

/// Chunk size used when fully allocating a file with zeroes.
pub const ALLOCATION_CHUNK_SIZE: usize = 1024 * 1024;

pub mod alter;
pub mod cache;
pub mod hash;
pub mod loader;
pub mod manifest;
pub mod prune;
pub mod reference;
pub mod registry;
pub mod resolve;
pub mod storage;
pub mod url;

#[cfg(test)]
pub(crate) mod testing;

/// Current Unix timestamp in seconds (shared utility for prune and the CLI).
pub fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `feeds`: feed:{feed_id} -> Feed (JSON)
/// - `entries`: entry:{entry_id} -> FeedEntry (JSON)
/// - `handlers`: handler:{name} -> StoredHandlerConfig (JSON)
/// - `diagnostics`: diag:{entry_id}:{run_id}:{index:04} -> Diagnostic (JSON)
/// - `metadata`: meta:{key} -> value (JSON)

/// Encode a feed key: feed:{feed_id}
pub fn encode_feed_key(feed_id: &str) -> Vec<u8> {
    format!("feed:{}", feed_id).into_bytes()
}

/// Encode an entry key: entry:{entry_id}
pub fn encode_entry_key(entry_id: &str) -> Vec<u8> {
    format!("entry:{}", entry_id).into_bytes()
}

/// Decode an entry key: entry:{entry_id} -> entry_id
pub fn decode_entry_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("entry:").map(String::from)
}

/// Encode a handler config key: handler:{name}
pub fn encode_handler_key(name: &str) -> Vec<u8> {
    format!("handler:{}", name).into_bytes()
}

/// Encode a diagnostic key: diag:{entry_id}:{run_id}:{index:04}
///
/// Run ids are UUIDv7, so keys of one entry sort by run time.
pub fn encode_diagnostic_key(entry_id: &str, run_id: &str, index: usize) -> Vec<u8> {
    format!("diag:{}:{}:{:04}", entry_id, run_id, index).into_bytes()
}

/// Encode a diagnostic prefix for range scan: diag:{entry_id}:
pub fn encode_diagnostic_prefix(entry_id: &str) -> Vec<u8> {
    format!("diag:{}:", entry_id).into_bytes()
}

/// Decode a diagnostic key -> (entry_id, run_id, index)
pub fn decode_diagnostic_key(key: &[u8]) -> Option<(String, String, usize)> {
    let key_str = std::str::from_utf8(key).ok()?;
    let parts: Vec<&str> = key_str.strip_prefix("diag:")?.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let index = parts[2].parse().ok()?;
    Some((parts[0].to_string(), parts[1].to_string(), index))
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

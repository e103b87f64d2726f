//! Instance identity helpers: WebSocket fingerprint and fallback instance
//! ids.

use rand::RngCore;

/// Generate the WebSocket control-channel fingerprint: 8 random bytes as
/// 16 lowercase hex characters. Generated once per server process and
/// required in the `?fp=` query of the `/ws` upgrade.
pub fn generate_fingerprint() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Best-effort system hostname. Falls back to `"localhost"`.
pub fn hostname() -> String {
    if let Ok(h) = std::env::var("HOSTNAME") {
        if !h.is_empty() {
            return h;
        }
    }
    std::process::Command::new("hostname")
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Synthesize a local instance id when the backend is absent:
/// `nanobot-<hostname>-<port>` (the pool protocol's fallback format).
pub fn synth_instance_id(port: u16) -> String {
    format!("nanobot-{}-{}", hostname(), port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_16_hex_chars() {
        let fp = generate_fingerprint();
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprints_differ_between_calls() {
        assert_ne!(generate_fingerprint(), generate_fingerprint());
    }

    #[test]
    fn synth_id_embeds_port() {
        let id = synth_instance_id(18790);
        assert!(id.starts_with("nanobot-"));
        assert!(id.ends_with("-18790"));
    }
}

//! Manifest URL construction

use crate::config::ServerConfig;
use crate::constants::MANIFEST_EXTENSION;
use crate::protocol::StreamKey;

/// Build the HLS manifest URL for a stream key.
///
/// Produces `https://{host}/{application_path}/{key}.m3u8`. Host and path are
/// not validated. The port is only included when `include_port` is set and
/// the port is non-empty.
pub fn build_manifest_url(config: &ServerConfig, key: &StreamKey) -> String {
    let port = config.port.trim();
    let authority = if config.include_port && !port.is_empty() {
        format!("{}:{}", config.host, port)
    } else {
        config.host.clone()
    };

    format!(
        "{}://{}/{}/{}.{}",
        config.protocol, authority, config.application_path, key, MANIFEST_EXTENSION
    )
}

use std::path::PathBuf;

/// Return the application configuration directory
///
/// This is where the device document and the TLS material live, it plays
/// the role of the flash filesystem on the device.
pub fn config_dir() -> PathBuf {
    let dir = if let Some(config_dir) = dirs::config_dir() {
        config_dir
    } else {
        // Fallback to home directory if config dir is not available
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    };
    dir.join(env!("PNPLINK_PKG_NAME"))
}

//! Machine configuration

use px86_core::cpu_i386::{BOOT_LOAD_ADDRESS, DEFAULT_MEMORY_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Memory size and boot state of the machine.
///
/// Missing fields in a JSON file take their default values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Size of guest memory in bytes
    pub memory_size: usize,
    /// Where the binary image is copied
    pub load_address: u32,
    pub initial_eip: u32,
    pub initial_esp: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            load_address: BOOT_LOAD_ADDRESS,
            initial_eip: BOOT_LOAD_ADDRESS,
            initial_esp: BOOT_LOAD_ADDRESS,
        }
    }
}

impl MachineConfig {
    /// Read a configuration from a JSON file
    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)
    }

    /// Largest image that fits between `load_address` and the end of memory
    pub fn image_capacity(&self) -> usize {
        self.memory_size.saturating_sub(self.load_address as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MachineConfig::default();
        assert_eq!(config.memory_size, 1024 * 1024);
        assert_eq!(config.load_address, 0x7C00);
        assert_eq!(config.initial_eip, 0x7C00);
        assert_eq!(config.initial_esp, 0x7C00);
        assert_eq!(config.image_capacity(), 1024 * 1024 - 0x7C00);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MachineConfig = serde_json::from_str(r#"{"memory_size": 65536}"#).unwrap();
        assert_eq!(config.memory_size, 65536);
        assert_eq!(config.load_address, 0x7C00);
    }

    #[test]
    fn test_capacity_when_load_address_is_past_memory() {
        let config = MachineConfig {
            memory_size: 0x1000,
            load_address: 0x2000,
            ..MachineConfig::default()
        };
        assert_eq!(config.image_capacity(), 0);
    }

    #[test]
    fn test_save_load_file() {
        let path = std::env::temp_dir().join(format!("px86_config_{}.json", std::process::id()));
        let config = MachineConfig {
            memory_size: 0x20000,
            initial_esp: 0x9000,
            ..MachineConfig::default()
        };

        config.save(&path).unwrap();
        let loaded = MachineConfig::load(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_invalid_json() {
        let path = std::env::temp_dir().join(format!("px86_bad_config_{}.json", std::process::id()));
        fs::write(&path, "not json").unwrap();
        let result = MachineConfig::load(&path);
        let _ = fs::remove_file(&path);

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }
}

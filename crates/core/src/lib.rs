//! Core interpreter primitives and traits.

pub mod cpu_i386;
pub mod io;
pub mod logging;

use cpu_i386::ExitReason;
use serde_json::Value;

/// Description of a mount point (media slot) that a system supports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPointInfo {
    /// Unique identifier for this mount point (e.g., "Binary")
    pub id: String,
    /// User-friendly name for display (e.g., "Boot Image")
    pub name: String,
    /// File extensions accepted by this mount point (e.g., ["bin", "img"])
    pub extensions: Vec<String>,
    /// Whether this mount point is required for the system to function
    pub required: bool,
}

/// A high-level System trait tying components together.
pub trait System {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reset to initial power-on state
    fn reset(&mut self);

    /// Execute the mounted program until it ends or faults.
    fn run(&mut self) -> Result<ExitReason, Self::Error>;

    /// Return a JSON-serializable save state: registers, flags and guest RAM.
    /// The mounted image is not stored separately; whatever of it is in RAM
    /// travels with the RAM.
    fn save_state(&self) -> Value;

    /// Load a JSON save state.
    /// Returns error if the state is incompatible with this machine.
    fn load_state(&mut self, v: &Value) -> Result<(), serde_json::Error>;

    /// Check if this system supports save/load state functionality
    fn supports_save_states(&self) -> bool {
        false
    }

    /// Get the list of mount points this system supports
    fn mount_points(&self) -> Vec<MountPointInfo>;

    /// Load media into a specific mount point
    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error>;

    /// Unload media from a specific mount point
    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error>;

    /// Check if a mount point has media loaded
    fn is_mounted(&self, mount_point_id: &str) -> bool;
}

//! Logical process roles of the host application.
//!
//! A host runs as several OS processes (the main UI process plus helper
//! processes named `<package>:<suffix>`). Every feature declares the roles it
//! may run in; the engine loads it only where the current role intersects
//! that mask.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

bitflags! {
    /// Set of logical process roles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ProcessRole: u32 {
        /// Main process (`<package>` with no suffix).
        const MAIN = 1 << 0;
        /// Push service process (`:push`).
        const PUSH = 1 << 1;
        /// Mini-program processes (`:appbrand0`, `:appbrand1`, ...).
        const APPBRAND = 1 << 2;
        /// Tool processes (`:tools`, `:toolsmp`).
        const TOOLS = 1 << 3;
        /// Sandbox process (`:sandbox`).
        const SANDBOX = 1 << 4;
        /// Media processes (`:hotpot`, `:hotpot..`).
        const HOTPOT = 1 << 5;
        /// Any other helper process.
        const OTHERS = 1 << 6;

        const ALL = Self::MAIN.bits()
            | Self::PUSH.bits()
            | Self::APPBRAND.bits()
            | Self::TOOLS.bits()
            | Self::SANDBOX.bits()
            | Self::HOTPOT.bits()
            | Self::OTHERS.bits();
    }
}

impl ProcessRole {
    /// Classify an OS process name into its role.
    ///
    /// ```
    /// use hookkit_engine::ProcessRole;
    ///
    /// assert_eq!(ProcessRole::from_process_name("com.example.app"), ProcessRole::MAIN);
    /// assert_eq!(ProcessRole::from_process_name("com.example.app:appbrand2"), ProcessRole::APPBRAND);
    /// ```
    pub fn from_process_name(name: &str) -> Self {
        let Some((_, tail)) = name.rsplit_once(':') else {
            return Self::MAIN;
        };

        match tail {
            "push" => Self::PUSH,
            "sandbox" => Self::SANDBOX,
            t if t.starts_with("appbrand") => Self::APPBRAND,
            t if t.starts_with("tools") => Self::TOOLS,
            t if t.starts_with("hotpot") => Self::HOTPOT,
            _ => Self::OTHERS,
        }
    }

    /// Whether a unit targeting `mask` may run in this process.
    pub fn is_eligible(self, mask: ProcessRole) -> bool {
        self.intersects(mask)
    }
}

impl Default for ProcessRole {
    fn default() -> Self {
        Self::MAIN
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = self
            .iter_names()
            .filter(|(name, _)| *name != "ALL")
            .map(|(name, _)| name)
            .collect();
        write!(f, "{}", names.join("|").to_lowercase())
    }
}

impl Serialize for ProcessRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for ProcessRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = u32::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}

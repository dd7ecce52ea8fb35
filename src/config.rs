//! Configuration for the topology engine.
//!
//! Timeouts and retry limits used by procedures and the handover logic,
//! loaded from a TOML file with per-field defaults.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
   error::{Result, TopologyError},
   topology::Profiles,
};

/// Main configuration structure for the engine.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
   #[serde(default = "default_initial_find_role_timeout")]
   pub initial_peer_find_role_timeout_ms: u64,

   #[serde(default = "default_find_role_timeout")]
   pub find_role_timeout_ms: u64,

   #[serde(default = "default_secondary_peer_connect_timeout")]
   pub secondary_peer_connect_timeout_ms: u64,

   #[serde(default = "default_primary_handset_connect_timeout")]
   pub primary_handset_connect_timeout_ms: u64,

   #[serde(default = "default_primary_peer_connect_timeout")]
   pub primary_peer_connect_timeout_ms: u64,

   #[serde(default = "default_handover_retry_timeout")]
   pub handover_retry_timeout_ms: u64,

   #[serde(default = "default_handover_max_retry_attempts")]
   pub handover_max_retry_attempts: u8,

   #[serde(default = "default_clean_connections_timeout")]
   pub clean_connections_timeout_ms: u64,

   #[serde(default = "default_peer_link_drop_timeout")]
   pub peer_link_drop_timeout_ms: u64,

   #[serde(default = "default_true")]
   pub dynamic_handover_supported: bool,

   /// Role is pinned by the product; handover and role negotiation are skipped.
   #[serde(default)]
   pub fixed_role: bool,

   #[serde(default = "default_peer_profiles")]
   pub peer_profiles: Profiles,
}

const fn default_initial_find_role_timeout() -> u64 {
   3000
}

const fn default_find_role_timeout() -> u64 {
   5000
}

const fn default_secondary_peer_connect_timeout() -> u64 {
   5000
}

const fn default_primary_handset_connect_timeout() -> u64 {
   5000
}

const fn default_primary_peer_connect_timeout() -> u64 {
   10240
}

const fn default_handover_retry_timeout() -> u64 {
   250
}

const fn default_handover_max_retry_attempts() -> u8 {
   8
}

const fn default_clean_connections_timeout() -> u64 {
   150
}

const fn default_peer_link_drop_timeout() -> u64 {
   1000
}

const fn default_true() -> bool {
   true
}

const fn default_peer_profiles() -> Profiles {
   Profiles::A2DP.union(Profiles::SCOFWD).union(Profiles::PEERSIG)
}

impl Default for Config {
   fn default() -> Self {
      Self {
         initial_peer_find_role_timeout_ms: default_initial_find_role_timeout(),
         find_role_timeout_ms: default_find_role_timeout(),
         secondary_peer_connect_timeout_ms: default_secondary_peer_connect_timeout(),
         primary_handset_connect_timeout_ms: default_primary_handset_connect_timeout(),
         primary_peer_connect_timeout_ms: default_primary_peer_connect_timeout(),
         handover_retry_timeout_ms: default_handover_retry_timeout(),
         handover_max_retry_attempts: default_handover_max_retry_attempts(),
         clean_connections_timeout_ms: default_clean_connections_timeout(),
         peer_link_drop_timeout_ms: default_peer_link_drop_timeout(),
         dynamic_handover_supported: default_true(),
         fixed_role: false,
         peer_profiles: default_peer_profiles(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(home) = env::var("TWS_TOPOLOGY_HOME") {
         PathBuf::from(home)
      } else if let Some(dir) = dirs::config_dir() {
         dir.join("tws-topology")
      } else {
         return Err(TopologyError::ConfigDirNotFound);
      };

      Ok(config_dir.join("config.toml"))
   }

   pub const fn initial_peer_find_role_timeout(&self) -> Duration {
      Duration::from_millis(self.initial_peer_find_role_timeout_ms)
   }

   pub const fn find_role_timeout(&self) -> Duration {
      Duration::from_millis(self.find_role_timeout_ms)
   }

   pub const fn secondary_peer_connect_timeout(&self) -> Duration {
      Duration::from_millis(self.secondary_peer_connect_timeout_ms)
   }

   pub const fn primary_peer_connect_timeout(&self) -> Duration {
      Duration::from_millis(self.primary_peer_connect_timeout_ms)
   }

   pub const fn handover_retry_timeout(&self) -> Duration {
      Duration::from_millis(self.handover_retry_timeout_ms)
   }

   pub const fn clean_connections_timeout(&self) -> Duration {
      Duration::from_millis(self.clean_connections_timeout_ms)
   }

   pub const fn peer_link_drop_timeout(&self) -> Duration {
      Duration::from_millis(self.peer_link_drop_timeout_ms)
   }
}

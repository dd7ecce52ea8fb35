//! Role arbitration core.
//!
//! Rule sets pick goals, the dispatcher resolves contention between goals and
//! runs their procedures or scripts, and the controller routes every external
//! notification to the rule set of the current role.

pub mod controller;
pub(crate) mod dispatcher;
pub mod events;
pub mod goals;
pub mod io;
pub mod peer_sig;
pub mod procedures;
pub mod rules;
pub(crate) mod script;
pub mod state;

use std::{fmt, ops::BitOr};

use serde::{Deserialize, Serialize};

pub use controller::Topology;
pub use events::RuleEvents;
pub use goals::{GoalId, GoalSet};
pub use io::{Command, Input};
pub use state::TopologyState;

/// Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BdAddr(pub [u8; 6]);

impl fmt::Display for BdAddr {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let [a, b, c, d, e, g] = self.0;
      write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
   }
}

/// Role of this earbud within the pair.
#[repr(u8)]
#[derive(
   Debug,
   Default,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum Role {
   #[default]
   None = 0,
   Primary = 1,
   Secondary = 2,
   ActingPrimary = 3,
   Dfu = 4,
   Shutdown = 5,
}

impl Role {
   /// Primary or acting primary; both own the handset link.
   pub const fn is_primary(self) -> bool {
      matches!(self, Self::Primary | Self::ActingPrimary)
   }
}

/// Physical state of the earbud as reported by the sensor layer.
#[repr(u8)]
#[derive(
   Debug,
   Default,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum PhyState {
   #[default]
   Unknown = 0,
   InCase = 1,
   OutOfEar = 2,
   InEar = 3,
}

impl PhyState {
   pub const fn is_in_case(self) -> bool {
      matches!(self, Self::InCase)
   }

   pub const fn is_out_of_case(self) -> bool {
      matches!(self, Self::OutOfEar | Self::InEar)
   }
}

/// Link transport an ACL runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum Transport {
   BrEdr,
   Le,
}

/// Reason an ACL went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum DisconnectReason {
   /// Supervision timeout, the link was lost rather than closed.
   ConnectionTimeout,
   RemoteTerminated,
   LocalTerminated,
   Other,
}

impl DisconnectReason {
   pub const fn is_link_loss(self) -> bool {
      matches!(self, Self::ConnectionTimeout)
   }
}

/// Bitmask of Bluetooth profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Profiles(u8);

const PROFILE_NAMES: &[(Profiles, &str)] = &[
   (Profiles::HFP, "hfp"),
   (Profiles::A2DP, "a2dp"),
   (Profiles::AVRCP, "avrcp"),
   (Profiles::SCOFWD, "scofwd"),
   (Profiles::PEERSIG, "peersig"),
   (Profiles::HANDOVER, "handover"),
   (Profiles::MIRROR, "mirror"),
];

impl Profiles {
   pub const NONE: Self = Self(0);
   pub const HFP: Self = Self(1 << 0);
   pub const A2DP: Self = Self(1 << 1);
   pub const AVRCP: Self = Self(1 << 2);
   pub const SCOFWD: Self = Self(1 << 3);
   pub const PEERSIG: Self = Self(1 << 4);
   pub const HANDOVER: Self = Self(1 << 5);
   pub const MIRROR: Self = Self(1 << 6);

   pub const fn from_bits(bits: u8) -> Self {
      Self(bits)
   }

   pub const fn bits(self) -> u8 {
      self.0
   }

   pub const fn union(self, other: Self) -> Self {
      Self(self.0 | other.0)
   }

   pub const fn difference(self, other: Self) -> Self {
      Self(self.0 & !other.0)
   }

   pub const fn intersects(self, other: Self) -> bool {
      self.0 & other.0 != 0
   }

   pub const fn contains(self, other: Self) -> bool {
      self.0 & other.0 == other.0
   }

   pub const fn is_empty(self) -> bool {
      self.0 == 0
   }
}

impl BitOr for Profiles {
   type Output = Self;

   fn bitor(self, rhs: Self) -> Self {
      self.union(rhs)
   }
}

impl fmt::Display for Profiles {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      if self.is_empty() {
         return f.write_str("none");
      }
      let mut first = true;
      for (profile, name) in PROFILE_NAMES {
         if self.contains(*profile) {
            if !first {
               f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
         }
      }
      Ok(())
   }
}

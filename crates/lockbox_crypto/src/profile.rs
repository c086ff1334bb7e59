//! Key derivation strength profiles.

use crate::error::CryptoError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Argon2id cost parameters bound to a [`Profile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub mem_cost_kib: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism (lanes).
    pub parallelism: u32,
}

/// A named strength tier for key derivation.
///
/// The tag is stored next to every sealed block, so the parameters of an
/// existing profile must never change. Stronger settings get a new tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Profile {
    /// Low cost: 8 MiB, 2 passes.
    #[serde(rename = "PROFILE_V1")]
    V1,
    /// Medium cost: 19 MiB, 2 passes.
    #[serde(rename = "PROFILE_V2")]
    V2,
    /// High cost: 64 MiB, 3 passes.
    #[serde(rename = "PROFILE_V3")]
    V3,
}

impl Profile {
    /// Every recognized profile, weakest first.
    pub const ALL: [Profile; 3] = [Profile::V1, Profile::V2, Profile::V3];

    /// Returns the Argon2id parameters for this profile.
    pub fn kdf_params(self) -> KdfParams {
        match self {
            Profile::V1 => KdfParams {
                mem_cost_kib: 8 * 1024,
                time_cost: 2,
                parallelism: 1,
            },
            Profile::V2 => KdfParams {
                mem_cost_kib: 19 * 1024,
                time_cost: 2,
                parallelism: 1,
            },
            Profile::V3 => KdfParams {
                mem_cost_kib: 64 * 1024,
                time_cost: 3,
                parallelism: 1,
            },
        }
    }

    /// Returns the wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::V1 => "PROFILE_V1",
            Profile::V2 => "PROFILE_V2",
            Profile::V3 => "PROFILE_V3",
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Profile::V2
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = CryptoError;

    /// Accepts the wire tag (`PROFILE_V2`) or the short form (`v2`, `2`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PROFILE_V1" | "V1" | "1" | "LOW" => Ok(Profile::V1),
            "PROFILE_V2" | "V2" | "2" | "MEDIUM" => Ok(Profile::V2),
            "PROFILE_V3" | "V3" | "3" | "HIGH" => Ok(Profile::V3),
            _ => Err(CryptoError::UnknownProfile(s.to_string())),
        }
    }
}

use serde::{Deserialize, Serialize};

/// Risk bucket of a symbol: 1 safest ... 4 most speculative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tier {
    Tier1 = 1,
    Tier2 = 2,
    Tier3 = 3,
    Tier4 = 4,
}

impl Tier {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Tier::Tier1),
            2 => Some(Tier::Tier2),
            3 => Some(Tier::Tier3),
            4 => Some(Tier::Tier4),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Administrative record of a tradable pair. Never mutated by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub code: String,
    pub display_name: String,
    pub tier: Tier,
    pub active: bool,
}

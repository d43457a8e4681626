use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use engine_core::Tier;

/// Per-tier position sizing and risk parameters (§6 `position_sizing.tier_*`).
#[derive(Debug, Clone)]
pub struct TierSizing {
    pub base_position_usd: Decimal,
    pub max_position_usd: Decimal,
    pub stop_pct: Decimal,
    /// Whether DCA is permitted for this tier (glossary: tier "controls ...
    /// whether DCA is allowed"). Tier4 (speculative) disallows it.
    pub dca_allowed: bool,
}

#[derive(Debug, Clone)]
pub struct TierConfig {
    pub tier1: TierSizing,
    pub tier2: TierSizing,
    pub tier3: TierSizing,
    pub tier4: TierSizing,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            tier1: TierSizing {
                base_position_usd: dec!(200),
                max_position_usd: dec!(600),
                stop_pct: dec!(0.08),
                dca_allowed: true,
            },
            tier2: TierSizing {
                base_position_usd: dec!(150),
                max_position_usd: dec!(450),
                stop_pct: dec!(0.10),
                dca_allowed: true,
            },
            tier3: TierSizing {
                base_position_usd: dec!(100),
                max_position_usd: dec!(300),
                stop_pct: dec!(0.12),
                dca_allowed: true,
            },
            tier4: TierSizing {
                base_position_usd: dec!(50),
                max_position_usd: dec!(150),
                stop_pct: dec!(0.15),
                dca_allowed: false,
            },
        }
    }
}

impl TierConfig {
    pub fn for_tier(&self, tier: Tier) -> &TierSizing {
        match tier {
            Tier::Tier1 => &self.tier1,
            Tier::Tier2 => &self.tier2,
            Tier::Tier3 => &self.tier3,
            Tier::Tier4 => &self.tier4,
        }
    }
}

/// TP levels at +5%/+8%/+12% above `avg_entry`, per the glossary's TP1/2/3
/// description.
pub fn take_profit_levels(avg_entry: Decimal) -> (Decimal, Decimal, Decimal) {
    (
        avg_entry * (Decimal::ONE + dec!(0.05)),
        avg_entry * (Decimal::ONE + dec!(0.08)),
        avg_entry * (Decimal::ONE + dec!(0.12)),
    )
}

// 🔗 Fusion Engine - join population and prices on (entity, year)
//
// Outer join by default: every key from either side survives, and the side
// that lacks it contributes None. Inner join only when configured.
// Rows come out ordered by entity, then year.

use crate::config::JoinPolicy;
use crate::population::PopulationSeries;
use crate::price::PriceSeries;
use crate::table::EntityYearKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

// ============================================================================
// UNIFIED TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRow {
    pub key: EntityYearKey,
    pub population: Option<f64>,
    /// One value per price column, in `UnifiedTable::price_columns` order
    pub prices: Vec<Option<f64>>,
}

impl UnifiedRow {
    pub fn entity(&self) -> &str {
        &self.key.entity
    }

    pub fn year(&self) -> i32 {
        self.key.year
    }

    /// First (default: only) price series
    pub fn price_value(&self) -> Option<f64> {
        self.prices.first().copied().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedTable {
    pub price_columns: Vec<String>,
    pub rows: Vec<UnifiedRow>,
}

impl UnifiedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Strictly increasing by (entity, year)
    pub fn is_strictly_ordered(&self) -> bool {
        self.rows.windows(2).all(|pair| pair[0].key < pair[1].key)
    }
}

// ============================================================================
// FUSER
// ============================================================================

pub struct Fuser {
    pub policy: JoinPolicy,
}

impl Fuser {
    pub fn new() -> Self {
        Fuser {
            policy: JoinPolicy::Outer,
        }
    }

    pub fn with_policy(policy: JoinPolicy) -> Self {
        Fuser { policy }
    }

    pub fn fuse(&self, population: &PopulationSeries, prices: &PriceSeries) -> UnifiedTable {
        let population_keys: BTreeSet<&EntityYearKey> = population.keys().collect();
        let price_keys: BTreeSet<&EntityYearKey> = prices.keys().collect();

        let keys: Vec<&EntityYearKey> = match self.policy {
            JoinPolicy::Outer => population_keys.union(&price_keys).copied().collect(),
            JoinPolicy::Inner => population_keys.intersection(&price_keys).copied().collect(),
        };

        let no_prices = vec![None; prices.columns.len()];
        let rows: Vec<UnifiedRow> = keys
            .into_iter()
            .map(|key| UnifiedRow {
                key: key.clone(),
                population: population.get(key),
                prices: prices
                    .get(key)
                    .map(|values| values.to_vec())
                    .unwrap_or_else(|| no_prices.clone()),
            })
            .collect();

        info!(
            policy = ?self.policy,
            population_keys = population_keys.len(),
            price_keys = price_keys.len(),
            population_only = population_keys.difference(&price_keys).count(),
            price_only = price_keys.difference(&population_keys).count(),
            rows = rows.len(),
            "fused population and prices"
        );

        UnifiedTable {
            price_columns: prices.columns.clone(),
            rows,
        }
    }
}

impl Default for Fuser {
    fn default() -> Self {
        Self::new()
    }
}

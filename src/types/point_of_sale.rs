//! Point-of-sale types

use serde::{Deserialize, Serialize};

/// Point-of-sale identifier
pub type PosId = u32;

/// Outlet where cards are charged
///
/// Referenced by payment transactions. The ledger reads points of sale but never
/// changes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointOfSale {
    pub id: PosId,
    pub name: String,
    pub category: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl PointOfSale {
    pub fn new(id: PosId, name: impl Into<String>, category: impl Into<String>) -> Self {
        PointOfSale {
            id,
            name: name.into(),
            category: category.into(),
            active: true,
        }
    }

    /// The outlets an event starts with when no catalog is supplied
    pub fn defaults() -> Vec<PointOfSale> {
        vec![
            PointOfSale::new(1, "Main Restaurant", "restaurant"),
            PointOfSale::new(2, "Cafeteria", "cafeteria"),
            PointOfSale::new(3, "Souvenir Shop", "souvenirs"),
            PointOfSale::new(4, "Parking", "parking"),
            PointOfSale::new(5, "Bar", "bar"),
        ]
    }
}

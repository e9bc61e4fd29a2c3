//! Catalog of points of sale
//!
//! The ledger only reads this directory: payments resolve their point of sale
//! here and reports use it to name their rows.

use crate::types::{Entity, LedgerError, PointOfSale, PosId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Read-mostly catalog of points of sale, keyed by id
#[derive(Debug, Default)]
pub struct PointOfSaleDirectory {
    entries: DashMap<PosId, PointOfSale>,
}

impl PointOfSaleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory seeded with the five outlets of a default event
    pub fn with_defaults() -> Self {
        let directory = Self::new();
        for pos in PointOfSale::defaults() {
            directory.entries.insert(pos.id, pos);
        }
        directory
    }

    /// Add a point of sale
    ///
    /// # Errors
    ///
    /// * `LedgerError::Validation` if the name is blank
    /// * `LedgerError::Conflict` if the id is taken
    pub fn register(&self, pos: PointOfSale) -> Result<(), LedgerError> {
        if pos.name.trim().is_empty() {
            return Err(LedgerError::validation(format!(
                "point of sale {} needs a name",
                pos.id
            )));
        }

        match self.entries.entry(pos.id) {
            Entry::Occupied(_) => Err(LedgerError::conflict(format!(
                "point of sale {} already exists",
                pos.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(pos);
                Ok(())
            }
        }
    }

    /// Look a point of sale up, active or not
    pub fn get(&self, id: PosId) -> Result<PointOfSale, LedgerError> {
        self.entries
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LedgerError::not_found(Entity::PointOfSale, id))
    }

    /// Open or close a point of sale
    pub fn set_active(&self, id: PosId, active: bool) -> Result<(), LedgerError> {
        let mut entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| LedgerError::not_found(Entity::PointOfSale, id))?;
        entry.active = active;
        Ok(())
    }

    /// Open points of sale, sorted by id
    pub fn list_active(&self) -> Vec<PointOfSale> {
        let mut active: Vec<PointOfSale> = self
            .entries
            .iter()
            .filter(|entry| entry.active)
            .map(|entry| entry.value().clone())
            .collect();
        active.sort_by_key(|pos| pos.id);
        active
    }

    /// Every point of sale, sorted by id
    pub fn all(&self) -> Vec<PointOfSale> {
        let mut all: Vec<PointOfSale> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|pos| pos.id);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_seeded() {
        let directory = PointOfSaleDirectory::with_defaults();
        let names: Vec<String> = directory.all().into_iter().map(|pos| pos.name).collect();
        assert_eq!(
            names,
            vec!["Main Restaurant", "Cafeteria", "Souvenir Shop", "Parking", "Bar"]
        );
    }

    #[test]
    fn test_register_rejects_duplicates_and_blank_names() {
        let directory = PointOfSaleDirectory::with_defaults();

        let duplicate = directory.register(PointOfSale::new(1, "Other", "food"));
        assert!(matches!(duplicate, Err(LedgerError::Conflict { .. })));

        let blank = directory.register(PointOfSale::new(9, "  ", "food"));
        assert!(matches!(blank, Err(LedgerError::Validation { .. })));
    }

    #[test]
    fn test_inactive_outlets_stay_visible_to_get() {
        let directory = PointOfSaleDirectory::with_defaults();
        directory.set_active(4, false).unwrap();

        assert!(!directory.get(4).unwrap().active);
        assert_eq!(directory.list_active().len(), 4);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let directory = PointOfSaleDirectory::new();
        assert!(matches!(
            directory.get(7),
            Err(LedgerError::NotFound { .. })
        ));
    }
}

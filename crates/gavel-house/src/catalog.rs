//! Item catalog
//!
//! The House only ever asks for one more item or reports one sold; where
//! items come from is behind [`Catalog`].

use std::path::Path;

use gavel_types::{Amount, ItemId};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::{HouseError, Result};

/// An item as the catalog stores it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub item_id: ItemId,
    pub title: String,
    pub category: String,
    /// Used as the auction's minimum bid
    pub reference_price: Amount,
}

/// Item source trait
#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    /// Take one unsold item that has not been drawn before
    async fn draw_item(&self) -> Option<CatalogItem>;

    /// Record that an item has been sold
    async fn mark_sold(&self, item_id: ItemId);
}

#[derive(Debug)]
struct Slot {
    item: CatalogItem,
    drawn: bool,
    sold: bool,
}

/// In-memory catalog drawing uniformly at random
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    slots: Mutex<Vec<Slot>>,
}

impl InMemoryCatalog {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        let slots = items
            .into_iter()
            .map(|item| Slot {
                item,
                drawn: false,
                sold: false,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Parse a JSON array of items
    pub fn from_json(json: &str) -> Result<Self> {
        let items: Vec<CatalogItem> = serde_json::from_str(json).map_err(|e| HouseError::Catalog {
            reason: e.to_string(),
        })?;
        Ok(Self::new(items))
    }

    /// Load a JSON array of items from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| HouseError::Catalog {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json(&json)
    }

    /// Items that can still be drawn
    pub fn remaining(&self) -> usize {
        self.slots.lock().iter().filter(|s| !s.drawn && !s.sold).count()
    }

    pub fn is_sold(&self, item_id: ItemId) -> bool {
        self.slots
            .lock()
            .iter()
            .any(|s| s.item.item_id == item_id && s.sold)
    }
}

#[async_trait::async_trait]
impl Catalog for InMemoryCatalog {
    async fn draw_item(&self) -> Option<CatalogItem> {
        let mut slots = self.slots.lock();
        let candidates: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.drawn && !s.sold)
            .map(|(i, _)| i)
            .collect();
        let index = *candidates.choose(&mut rand::thread_rng())?;
        let slot = &mut slots[index];
        slot.drawn = true;
        Some(slot.item.clone())
    }

    async fn mark_sold(&self, item_id: ItemId) {
        if let Some(slot) = self.slots.lock().iter_mut().find(|s| s.item.item_id == item_id) {
            slot.sold = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn items(n: u32) -> Vec<CatalogItem> {
        (1..=n)
            .map(|i| CatalogItem {
                item_id: ItemId::new(i),
                title: format!("Lot {}", i),
                category: "painting".to_string(),
                reference_price: Amount::new(10 * i as u64),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_draws_each_item_once() {
        let catalog = InMemoryCatalog::new(items(5));
        let mut seen = HashSet::new();
        while let Some(item) = catalog.draw_item().await {
            assert!(seen.insert(item.item_id));
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(catalog.remaining(), 0);
    }

    #[tokio::test]
    async fn test_mark_sold() {
        let catalog = InMemoryCatalog::new(items(2));
        let item = catalog.draw_item().await.unwrap();
        catalog.mark_sold(item.item_id).await;
        assert!(catalog.is_sold(item.item_id));
        assert_eq!(catalog.remaining(), 1);
    }

    #[test]
    fn test_from_json() {
        let json = r#"[
            {"item_id": 4, "title": "Harbor at Dusk", "category": "painting", "reference_price": 120}
        ]"#;
        let catalog = InMemoryCatalog::from_json(json).unwrap();
        assert_eq!(catalog.remaining(), 1);

        assert!(matches!(
            InMemoryCatalog::from_json("{}"),
            Err(HouseError::Catalog { .. })
        ));
    }
}

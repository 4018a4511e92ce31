//! In-memory item store.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::ItemsConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub name: String,
    pub description: String,
}

/// Validated fields for creating or replacing an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFields {
    pub name: String,
    pub description: String,
}

/// Upper bound of the simulated delay for each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl Operation {
    fn max_latency(self) -> Duration {
        let ms = match self {
            Operation::List => 100,
            Operation::Get => 50,
            Operation::Create => 150,
            Operation::Update => 100,
            Operation::Delete => 75,
        };
        Duration::from_millis(ms)
    }
}

/// Items shared by all handlers.
///
/// Ids are assigned as the current maximum plus one, inside the same write
/// lock as the insert, so concurrent creates never collide.
#[derive(Debug)]
pub struct ItemStore {
    items: RwLock<Vec<Item>>,
    simulate_latency: bool,
}

impl ItemStore {
    pub fn new(items: Vec<Item>, simulate_latency: bool) -> Self {
        Self {
            items: RwLock::new(items),
            simulate_latency,
        }
    }

    pub fn from_config(config: &ItemsConfig) -> Self {
        let items = if config.seed { seed_items() } else { Vec::new() };
        Self::new(items, config.simulate_latency)
    }

    pub async fn list(&self) -> Vec<Item> {
        self.delay(Operation::List).await;
        self.items.read().await.clone()
    }

    pub async fn get(&self, id: u64) -> Option<Item> {
        self.delay(Operation::Get).await;
        self.items.read().await.iter().find(|i| i.id == id).cloned()
    }

    pub async fn create(&self, fields: ItemFields) -> Item {
        self.delay(Operation::Create).await;
        let mut items = self.items.write().await;
        let id = items.iter().map(|i| i.id).max().unwrap_or(0) + 1;
        let item = Item {
            id,
            name: fields.name,
            description: fields.description,
        };
        items.push(item.clone());
        item
    }

    /// Replace name and description. `None` if the id is unknown.
    pub async fn update(&self, id: u64, fields: ItemFields) -> Option<Item> {
        self.delay(Operation::Update).await;
        let mut items = self.items.write().await;
        let item = items.iter_mut().find(|i| i.id == id)?;
        item.name = fields.name;
        item.description = fields.description;
        Some(item.clone())
    }

    /// Remove an item. Returns false if the id is unknown.
    pub async fn delete(&self, id: u64) -> bool {
        self.delay(Operation::Delete).await;
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|i| i.id != id);
        items.len() != before
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn delay(&self, operation: Operation) {
        if !self.simulate_latency {
            return;
        }
        let max = operation.max_latency().as_millis() as u64;
        let ms = rand::thread_rng().gen_range(0..=max);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

impl Default for ItemStore {
    fn default() -> Self {
        Self::from_config(&ItemsConfig::default())
    }
}

pub fn seed_items() -> Vec<Item> {
    (1..=3)
        .map(|id| Item {
            id,
            name: format!("Item {id}"),
            description: format!("Descripción del item {id}"),
        })
        .collect()
}

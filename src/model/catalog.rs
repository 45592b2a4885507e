//! Sample catalog records stored as JSON blobs
//!
//! A product refers to its category by id. Serialized products never embed a
//! copy of their category; [`Catalog::join`] reattaches them after a read.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: u32,
    pub name: String,
}

impl Category {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Category {
            id,
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: u32,
    pub name: String,
    pub price: f64,
    pub category_id: u32,
}

impl Product {
    pub fn new(id: u32, name: impl Into<String>, price: f64, category: &Category) -> Self {
        Product {
            id,
            name: name.into(),
            price,
            category_id: category.id,
        }
    }
}

/// Categories and the products that belong to them
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub categories: Vec<Category>,
    pub products: Vec<Product>,
}

impl Catalog {
    pub fn new(categories: Vec<Category>, products: Vec<Product>) -> Self {
        Catalog {
            categories,
            products,
        }
    }

    /// The data the demo writes
    pub fn sample() -> Self {
        let fruit = Category::new(1, "Fruit");
        let dairy = Category::new(2, "Dairy");
        let bakery = Category::new(3, "Bakery");

        let products = vec![
            Product::new(1, "Apple", 0.45, &fruit),
            Product::new(2, "Banana", 0.30, &fruit),
            Product::new(3, "Milk", 1.19, &dairy),
            Product::new(4, "Cheddar", 3.75, &dairy),
            Product::new(5, "Sourdough", 4.20, &bakery),
        ];

        Catalog::new(vec![fruit, dairy, bakery], products)
    }

    /// Pair every product with its category, `None` when the id dangles
    pub fn join(&self) -> Vec<(&Product, Option<&Category>)> {
        let by_id: HashMap<u32, &Category> =
            self.categories.iter().map(|c| (c.id, c)).collect();
        self.products
            .iter()
            .map(|p| (p, by_id.get(&p.category_id).copied()))
            .collect()
    }

    /// Products whose category id matches no category
    pub fn orphans(&self) -> Vec<&Product> {
        self.join()
            .into_iter()
            .filter(|(_, c)| c.is_none())
            .map(|(p, _)| p)
            .collect()
    }
}

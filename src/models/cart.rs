use serde::{Deserialize, Serialize};

/// A cart line joined with the product's current price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub slug: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub line_total_cents: i64,
    /// Units currently in stock, so the client can warn before checkout
    pub available: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub items: Vec<CartLine>,
    pub total_cents: i64,
    pub currency: String,
}

impl Cart {
    pub fn from_lines(items: Vec<CartLine>) -> Self {
        let total_cents = items.iter().map(|l| l.line_total_cents).sum();
        Self {
            items,
            total_cents,
            currency: "USD".to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Deserialize)]
pub struct AddCartItem {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCartItem {
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

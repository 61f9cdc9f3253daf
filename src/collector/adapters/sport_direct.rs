//! SportDirect adapter (GBP catalog).
//!
//! Response shape:
//! ```json
//! {
//!   "provider": "SportDirect",
//!   "currency": "GBP",
//!   "products": [
//!     {
//!       "product_id": 1,
//!       "product_name": "Nike Pegasus 40",
//!       "brand": "Nike",
//!       "category": "Running",
//!       "colour": "Blue",
//!       "price_gbp": 130.95,
//!       "stock_quantity": 100,
//!       "in_stock": true
//!     }
//!   ]
//! }
//! ```

use serde_json::Value;

use super::{
    bool_field, code_field, int_field, now_collected, optional_str, price_field, required_str,
    string_list, AdapterError, ProviderAdapter,
};
use crate::models::UnifiedRecord;

#[derive(Debug)]
pub struct SportDirectAdapter;

impl ProviderAdapter for SportDirectAdapter {
    fn provider_slug(&self) -> &'static str {
        "sport-direct"
    }

    fn display_name(&self) -> &'static str {
        "SportDirect"
    }

    fn default_currency(&self) -> &'static str {
        "GBP"
    }

    fn items_key(&self) -> &'static str {
        "products"
    }

    fn adapt_item(&self, item: &Value) -> Result<UnifiedRecord, AdapterError> {
        let colors = optional_str(item, "colour").map(|c| vec![c]).unwrap_or_default();

        Ok(UnifiedRecord {
            provider_slug: self.provider_slug().to_string(),
            external_code: code_field(item, "product_id")?,
            name: required_str(item, "product_name")?,
            brand: optional_str(item, "brand"),
            category: optional_str(item, "category"),
            price: price_field(item, "price_gbp")?,
            currency_code: self.default_currency().to_string(),
            in_stock: bool_field(item, "in_stock"),
            stock_quantity: int_field(item, "stock_quantity"),
            product_url: optional_str(item, "product_url"),
            colors,
            sizes: string_list(item, "sizes"),
            collected_at: now_collected(),
        })
    }
}

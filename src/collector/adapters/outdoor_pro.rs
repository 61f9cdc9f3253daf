//! OutdoorPro adapter (USD catalog, per-item currency override).
//!
//! Response shape:
//! ```json
//! {
//!   "source": "OutdoorPro",
//!   "count": 21,
//!   "items": [
//!     {
//!       "id": 1,
//!       "name": "NorthFace Stormbreak 2",
//!       "brand": "NorthFace",
//!       "category": "Camping",
//!       "price": 325.95,
//!       "currency": "USD",
//!       "stock": 27,
//!       "available": true
//!     }
//!   ]
//! }
//! ```

use serde_json::Value;

use super::{
    bool_field, code_field, int_field, now_collected, optional_str, price_field, required_str,
    AdapterError, ProviderAdapter,
};
use crate::models::UnifiedRecord;

#[derive(Debug)]
pub struct OutdoorProAdapter;

impl ProviderAdapter for OutdoorProAdapter {
    fn provider_slug(&self) -> &'static str {
        "outdoor-pro"
    }

    fn display_name(&self) -> &'static str {
        "OutdoorPro"
    }

    fn default_currency(&self) -> &'static str {
        "USD"
    }

    fn items_key(&self) -> &'static str {
        "items"
    }

    fn adapt_item(&self, item: &Value) -> Result<UnifiedRecord, AdapterError> {
        Ok(UnifiedRecord {
            provider_slug: self.provider_slug().to_string(),
            external_code: code_field(item, "id")?,
            name: required_str(item, "name")?,
            brand: optional_str(item, "brand"),
            category: optional_str(item, "category"),
            price: price_field(item, "price")?,
            currency_code: optional_str(item, "currency")
                .unwrap_or_else(|| self.default_currency().to_string()),
            in_stock: bool_field(item, "available"),
            stock_quantity: int_field(item, "stock"),
            product_url: optional_str(item, "url"),
            // OutdoorPro does not publish colors or sizes.
            colors: Vec::new(),
            sizes: Vec::new(),
            collected_at: now_collected(),
        })
    }
}

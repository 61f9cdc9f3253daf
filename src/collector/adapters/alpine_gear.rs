//! AlpineGear adapter (German field names, EUR catalog).
//!
//! Response shape:
//! ```json
//! {
//!   "anbieter": "AlpineGear",
//!   "waehrung": "EUR",
//!   "produkte": [
//!     {
//!       "artikel_id": 1,
//!       "produktname": "Mammut Nordwand Pro HS",
//!       "marke": "Mammut",
//!       "kategorie": "Bekleidung",
//!       "farbe": "Rot",
//!       "preis": 599.95,
//!       "lagerbestand": 23,
//!       "verfuegbar": true
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
pub struct AlpineGearAdapter;

impl ProviderAdapter for AlpineGearAdapter {
    fn provider_slug(&self) -> &'static str {
        "alpine-gear"
    }

    fn display_name(&self) -> &'static str {
        "AlpineGear"
    }

    fn default_currency(&self) -> &'static str {
        "EUR"
    }

    fn items_key(&self) -> &'static str {
        "produkte"
    }

    fn adapt_item(&self, item: &Value) -> Result<UnifiedRecord, AdapterError> {
        let colors = optional_str(item, "farbe").map(|c| vec![c]).unwrap_or_default();

        Ok(UnifiedRecord {
            provider_slug: self.provider_slug().to_string(),
            external_code: code_field(item, "artikel_id")?,
            name: required_str(item, "produktname")?,
            brand: optional_str(item, "marke"),
            category: optional_str(item, "kategorie"),
            price: price_field(item, "preis")?,
            currency_code: self.default_currency().to_string(),
            in_stock: bool_field(item, "verfuegbar"),
            stock_quantity: int_field(item, "lagerbestand"),
            product_url: optional_str(item, "produkt_url"),
            colors,
            sizes: string_list(item, "groessen"),
            collected_at: now_collected(),
        })
    }
}

//! DagSpor adapter (Turkish field names, TRY catalog).
//!
//! Response shape:
//! ```json
//! {
//!   "tedarikci": "DagSpor",
//!   "para_birimi": "TRY",
//!   "urunler": [
//!     {
//!       "urun_id": 1,
//!       "urun_adi": "Salomon X Ultra 4 GTX",
//!       "marka": "Salomon",
//!       "kategori": "Outdoor",
//!       "renk": "Gri",
//!       "fiyat": 8499.99,
//!       "stok_adedi": 45,
//!       "stokta_var": true
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
pub struct DagSporAdapter;

impl ProviderAdapter for DagSporAdapter {
    fn provider_slug(&self) -> &'static str {
        "dag-spor"
    }

    fn display_name(&self) -> &'static str {
        "DagSpor"
    }

    fn default_currency(&self) -> &'static str {
        "TRY"
    }

    fn items_key(&self) -> &'static str {
        "urunler"
    }

    fn adapt_item(&self, item: &Value) -> Result<UnifiedRecord, AdapterError> {
        let colors = optional_str(item, "renk").map(|c| vec![c]).unwrap_or_default();

        Ok(UnifiedRecord {
            provider_slug: self.provider_slug().to_string(),
            external_code: code_field(item, "urun_id")?,
            name: required_str(item, "urun_adi")?,
            brand: optional_str(item, "marka"),
            category: optional_str(item, "kategori"),
            price: price_field(item, "fiyat")?,
            currency_code: self.default_currency().to_string(),
            in_stock: bool_field(item, "stokta_var"),
            stock_quantity: int_field(item, "stok_adedi"),
            product_url: optional_str(item, "urun_url"),
            colors,
            sizes: string_list(item, "bedenler"),
            collected_at: now_collected(),
        })
    }
}

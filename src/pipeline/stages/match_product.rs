//! Canonical product matching: links each mapping to a product by
//! normalized name, creating the product (and its color/size variants) on
//! first sight.
//!
//! Matching heuristic: lowercase the name, collapse whitespace, exact
//! lookup. SKUs follow `<slug>-<color3>-<size>`, dropping the size part for
//! color-only variants.

use async_trait::async_trait;
use serde_json::json;

use crate::db::models::NewProduct;
use crate::db::UnitOfWork;
use crate::models::PipelineRecord;
use crate::pipeline::{PipelineContext, Stage};

pub struct MatchProductStage;

/// Lowercases and collapses internal whitespace.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Slug for a normalized name: spaces become dashes.
pub fn slugify(normalized_name: &str) -> String {
    normalized_name.replace(' ', "-")
}

/// SKU for one variant combination.
pub fn variant_sku(slug: &str, color: &str, size: Option<&str>) -> String {
    let color3: String = color.to_lowercase().chars().take(3).collect();
    match size {
        Some(size) => format!("{}-{}-{}", slug, color3, size.to_lowercase()),
        None => format!("{}-{}", slug, color3),
    }
}

/// Color×size combinations for one record; color-only when no sizes exist.
fn variant_combinations(record: &PipelineRecord) -> Vec<(String, Option<String>)> {
    let mut combinations = Vec::new();
    for color in &record.colors {
        if record.sizes.is_empty() {
            combinations.push((color.clone(), None));
        } else {
            for size in &record.sizes {
                combinations.push((color.clone(), Some(size.clone())));
            }
        }
    }
    combinations
}

#[async_trait]
impl Stage for MatchProductStage {
    fn name(&self) -> &'static str {
        "match_product"
    }

    async fn process(&self, ctx: &mut PipelineContext, uow: &mut UnitOfWork) {
        if ctx.data.is_empty() {
            return;
        }

        let mut matched = 0usize;
        let mut created = 0usize;
        let mut variants_created = 0usize;
        let mut errors: Vec<String> = Vec::new();

        let mut records = std::mem::take(&mut ctx.data);
        for record in records.iter_mut() {
            // Previously matched mappings keep their product.
            if let Some(product_id) = record.existing_product_id {
                record.product_id = Some(product_id);
                continue;
            }

            let Some(mapping_id) = record.mapping_id else {
                continue;
            };

            let normalized = normalize_name(&record.name);
            if normalized.is_empty() {
                errors.push(format!(
                    "Mapping {}: invalid product name '{}'",
                    mapping_id, record.name
                ));
                continue;
            }

            let lookup = uow.products().find_by_name(&normalized).await;
            let product = match lookup {
                Ok(Some(existing)) => {
                    matched += 1;
                    existing
                }
                Ok(None) => {
                    let slug = slugify(&normalized);
                    let description = match (&record.brand, &record.category) {
                        (Some(brand), Some(category)) => Some(format!("{} - {}", brand, category)),
                        (Some(brand), None) => Some(brand.clone()),
                        (None, Some(category)) => Some(category.clone()),
                        (None, None) => None,
                    };
                    let new_product = NewProduct {
                        name: normalized.clone(),
                        slug: slug.clone(),
                        brand: record.brand.clone(),
                        description,
                    };
                    match uow.products().insert(&new_product).await {
                        Ok(inserted) => {
                            created += 1;
                            match create_variants(uow, record, inserted.id, &slug).await {
                                Ok(count) => variants_created += count,
                                Err(e) => errors.push(format!(
                                    "Mapping {}: variant creation error: {}",
                                    mapping_id, e
                                )),
                            }
                            inserted
                        }
                        Err(e) => {
                            errors.push(format!("Mapping {}: product creation error: {}", mapping_id, e));
                            continue;
                        }
                    }
                }
                Err(e) => {
                    errors.push(format!("Mapping {}: product lookup error: {}", mapping_id, e));
                    continue;
                }
            };

            if let Err(e) = uow.product_mappings().set_product(mapping_id, product.id).await {
                errors.push(format!("Mapping {}: product link error: {}", mapping_id, e));
                continue;
            }
            record.product_id = Some(product.id);
        }

        ctx.set_count("products_matched_existing", matched);
        ctx.set_count("products_created", created);
        ctx.set_count("variants_created", variants_created);
        ctx.data = records;
        ctx.errors.extend(errors);
    }
}

async fn create_variants(
    uow: &mut UnitOfWork,
    record: &PipelineRecord,
    product_id: i32,
    slug: &str,
) -> Result<usize, crate::db::DbError> {
    let mut created = 0usize;
    for (color, size) in variant_combinations(record) {
        let sku = variant_sku(slug, &color, size.as_deref());
        let attributes = match &size {
            Some(size) => json!({"color": color, "size": size}),
            None => json!({"color": color}),
        };
        if uow
            .product_variants()
            .insert_if_absent(product_id, &sku, attributes)
            .await?
            .is_some()
        {
            created += 1;
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use test_case::test_case;

    #[test_case("Nike Air  Max", "nike air max" ; "collapses whitespace")]
    #[test_case("  ADIDAS X ", "adidas x" ; "trims and lowercases")]
    #[test_case("", "" ; "empty stays empty")]
    fn normalizes_names(input: &str, expected: &str) {
        assert_eq!(normalize_name(input), expected);
    }

    #[test]
    fn slug_replaces_spaces() {
        assert_eq!(slugify("nike air max"), "nike-air-max");
    }

    #[test]
    fn sku_includes_color_prefix_and_size() {
        assert_eq!(variant_sku("nike-air", "Blue", Some("42")), "nike-air-blu-42");
        assert_eq!(variant_sku("nike-air", "Gri", None), "nike-air-gri");
    }

    fn record_with(colors: Vec<&str>, sizes: Vec<&str>) -> PipelineRecord {
        PipelineRecord {
            provider_slug: "sport-direct".to_string(),
            provider_id: Some(1),
            external_code: "1".to_string(),
            name: "Nike Air".to_string(),
            brand: None,
            category: None,
            raw_price: crate::models::PriceValue::Number(1.0),
            currency_code: "TRY".to_string(),
            in_stock: true,
            stock_quantity: None,
            product_url: None,
            colors: colors.into_iter().map(String::from).collect(),
            sizes: sizes.into_iter().map(String::from).collect(),
            collected_at: Utc::now(),
            normalized: None,
            mapping_id: Some(1),
            existing_product_id: None,
            product_id: None,
            price_history_id: None,
            trend: None,
            margin: None,
            weighting: None,
        }
    }

    #[test]
    fn variants_are_color_by_size() {
        let record = record_with(vec!["Blue", "Red"], vec!["S", "M"]);
        let combos = variant_combinations(&record);
        assert_eq!(combos.len(), 4);
        assert!(combos.contains(&("Blue".to_string(), Some("M".to_string()))));
    }

    #[test]
    fn variants_fall_back_to_color_only() {
        let record = record_with(vec!["Gri"], vec![]);
        assert_eq!(variant_combinations(&record), vec![("Gri".to_string(), None)]);
    }

    #[test]
    fn no_colors_means_no_variants() {
        let record = record_with(vec![], vec!["S"]);
        assert!(variant_combinations(&record).is_empty());
    }
}

//! Mapping resolution: every record needs the `(provider_id, external_code)`
//! identity upserted before anything downstream can persist against it.

use async_trait::async_trait;

use crate::db::UnitOfWork;
use crate::pipeline::{PipelineContext, Stage};

pub struct ResolveMappingStage;

#[async_trait]
impl Stage for ResolveMappingStage {
    fn name(&self) -> &'static str {
        "resolve_mapping"
    }

    async fn process(&self, ctx: &mut PipelineContext, uow: &mut UnitOfWork) {
        if ctx.data.is_empty() {
            return;
        }

        let records = std::mem::take(&mut ctx.data);
        let mut resolved = Vec::with_capacity(records.len());
        let mut errors = Vec::new();

        for mut record in records {
            let Some(provider_id) = record.provider_id else {
                errors.push(format!(
                    "ID {}: provider_id missing, mapping not created",
                    record.external_code
                ));
                continue;
            };

            if record.external_code.trim().is_empty() {
                errors.push("record carries no external product code".to_string());
                continue;
            }

            match uow
                .product_mappings()
                .find_or_create(
                    provider_id,
                    &record.external_code,
                    record.product_url.as_deref(),
                )
                .await
            {
                Ok(mapping) => {
                    record.mapping_id = Some(mapping.id);
                    record.existing_product_id = mapping.product_id;
                    resolved.push(record);
                }
                Err(e) => {
                    errors.push(format!(
                        "ID {}: mapping error: {}",
                        record.external_code, e
                    ));
                }
            }
        }

        ctx.set_count("mappings_processed", resolved.len());
        ctx.set_count("mapping_errors", errors.len());
        ctx.data = resolved;
        ctx.errors.extend(errors);
    }
}

//! The analysis stages, in their fixed pipeline order.

pub mod match_product;
pub mod normalize_currency;
pub mod profit_margin;
pub mod reliability_weighting;
pub mod resolve_mapping;
pub mod save_price_history;
pub mod trend_analysis;
pub mod update_trending;

pub use match_product::MatchProductStage;
pub use normalize_currency::NormalizeCurrencyStage;
pub use profit_margin::ProfitMarginStage;
pub use reliability_weighting::ReliabilityWeightingStage;
pub use resolve_mapping::ResolveMappingStage;
pub use save_price_history::SavePriceHistoryStage;
pub use trend_analysis::TrendAnalysisStage;
pub use update_trending::UpdateTrendingStage;

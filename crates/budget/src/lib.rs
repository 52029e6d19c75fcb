//! Cross-platform budget optimization — performance scoring, weighted
//! allocation under platform bounds, recommendations, safety-gated
//! rebalancing with cooldown and approval, and CPA-driven bid adjustment.

pub mod analysis;
pub mod bids;
pub mod impact;
pub mod optimizer;
pub mod rebalancer;
pub mod recommendations;
pub mod scorer;

pub use analysis::{analyze, AllocationAnalysis};
pub use bids::{BidExecutor, BidOptimization, BidOptimizer, BidOptions, BidRecommendation};
pub use impact::ExpectedImpact;
pub use optimizer::{AllocationOptimizer, OptimalAllocation, PlatformAllocationState};
pub use rebalancer::{
    ApprovalOutcome, ExecutedChange, PendingChange, RebalanceExecution, RebalanceExecutor,
    RebalanceOptions,
};
pub use recommendations::{Priority, Recommendation, RecommendationEngine};
pub use scorer::PerformanceScorer;

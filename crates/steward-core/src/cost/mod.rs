//! Cost management: pricing, budgets, routing and reporting

pub mod pricing;
pub mod quota;
pub mod report;
pub mod routing;

pub use pricing::{PricingTable, TokenPrice};
pub use quota::{QuotaCheck, QuotaManager, QuotaTier};
pub use report::{CostReport, CostReporter};
pub use routing::{Complexity, RoutingChoice, RoutingOptimizer};

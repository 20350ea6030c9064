//! Stock (point-in-time) aggregations.
//!
//! A stock metric such as an account balance must not be summed across
//! time. When the query buckets are coarser than the stock granularity,
//! only the last stock bucket inside each query bucket contributes.

use tracing::debug;

use crate::model::{Aggregator, Filter, Granularity, GranularityUnit};

use super::calendar::{Calendar, CalendarError};
use super::QueryContext;

#[derive(Debug, Clone, PartialEq)]
pub struct StockAggregation {
    pub base: Aggregator,
    /// Granularity at which the stock is recorded.
    pub granularity: GranularityUnit,
}

impl StockAggregation {
    pub fn new(base: Aggregator, granularity: GranularityUnit) -> Self {
        Self { base, granularity }
    }

    pub fn filter(&self) -> Filter {
        self.base.filter()
    }

    pub fn with_filter(&self, filter: &Filter) -> Self {
        Self {
            base: self.base.with_filter(filter),
            granularity: self.granularity,
        }
    }

    /// Concrete aggregator for the given query shape.
    pub fn resolve(
        &self,
        ctx: &QueryContext<'_>,
        calendar: &dyn Calendar,
    ) -> Result<Aggregator, CalendarError> {
        let query_unit = ctx.granularity.unit();
        if query_unit <= self.granularity {
            return Ok(self.base.clone());
        }

        let buckets = match ctx.granularity {
            Granularity::Arbitrary { intervals } => intervals.clone(),
            _ => {
                let mut buckets = Vec::new();
                for interval in ctx.intervals {
                    buckets.extend(calendar.split(interval, query_unit)?);
                }
                buckets
            }
        };

        let mut last_points = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            if let Some(last) = calendar.split(bucket, self.granularity)?.pop() {
                last_points.push(last);
            }
        }
        debug!(
            query_buckets = buckets.len(),
            stock_granularity = %self.granularity,
            "restricted stock aggregation to last bucket per period"
        );

        Ok(Aggregator::filtered(
            Filter::time_intervals(last_points),
            self.base.clone(),
        ))
    }
}

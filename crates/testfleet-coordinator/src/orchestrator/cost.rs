//! Run cost estimation
//!
//! Advisory only: combines the current spot price, the template volume size,
//! and a best-effort external storage price feed into a per-hour estimate.
//! The feed is allowed to be down; estimation then falls back to a
//! conservative fixed price and never errors.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use testfleet_common::defaults::{
    FALLBACK_STORAGE_PRICE, HOURS_PER_MONTH, STORAGE_KIND_EBS_SSD,
};

/// Cost breakdown for one hour of a prospective run
#[derive(Debug, Clone)]
pub struct CostEstimate {
    pub instance_type: String,
    pub worker_count: u32,
    /// Current spot price per instance-hour
    pub spot_price: f64,
    /// Spot price x worker count
    pub compute_cost: f64,
    /// Volume size each worker inherits from the template, in GiB
    pub volume_gib: f64,
    /// Volume size x worker count
    pub total_volume_gib: f64,
    /// Per GB-month storage price used
    pub storage_price_gib_month: f64,
    /// Storage charge for one hour of the total volume
    pub storage_cost: f64,
    pub total: f64,
}

/// Combine the inputs into a cost breakdown.
///
/// Storage is billed per GB-month; one hour of `total_volume` GiB costs
/// `total_volume / 744 * price`.
pub fn estimate_run_cost(
    instance_type: &str,
    worker_count: u32,
    volume_gib: f64,
    spot_price: f64,
    storage_price_gib_month: f64,
) -> CostEstimate {
    let compute_cost = spot_price * f64::from(worker_count);
    let total_volume_gib = volume_gib * f64::from(worker_count);
    let storage_cost = total_volume_gib / HOURS_PER_MONTH * storage_price_gib_month;

    CostEstimate {
        instance_type: instance_type.to_string(),
        worker_count,
        spot_price,
        compute_cost,
        volume_gib,
        total_volume_gib,
        storage_price_gib_month,
        storage_cost,
        total: compute_cost + storage_cost,
    }
}

/// One record in the external storage price feed
#[derive(Debug, Deserialize)]
struct StorageRecord {
    region: String,
    kind: String,
    price: f64,
}

/// Fetch the per GB-month storage price for a region.
///
/// Falls back to [`FALLBACK_STORAGE_PRICE`] on any failure: unreachable
/// feed, bad status, unparsable body, or no matching record. This path must
/// never raise; a missing price feed is not a reason to block a run.
pub async fn fetch_storage_price(feed_url: &str, region: &str) -> f64 {
    let Ok(client) = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
    else {
        return FALLBACK_STORAGE_PRICE;
    };

    let records: Vec<StorageRecord> = match client.get(feed_url).send().await {
        Ok(response) => match response.json().await {
            Ok(records) => records,
            Err(e) => {
                debug!(error = %e, "Storage price feed returned an unparsable body");
                return FALLBACK_STORAGE_PRICE;
            }
        },
        Err(e) => {
            debug!(error = %e, "Storage price feed unreachable");
            return FALLBACK_STORAGE_PRICE;
        }
    };

    records
        .iter()
        .find(|r| r.region == region && r.kind == STORAGE_KIND_EBS_SSD)
        .map(|r| r.price)
        .unwrap_or(FALLBACK_STORAGE_PRICE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worked_example() {
        // 50 GiB x 20 workers = 1000 GiB; at $0.12/GB-month one hour costs
        // 1000 / 744 * 0.12 ~= $0.16
        let estimate = estimate_run_cost("m5.large", 20, 50.0, 0.05, 0.12);
        assert!((estimate.compute_cost - 1.0).abs() < 1e-9);
        assert!((estimate.storage_cost - 0.1613).abs() < 1e-3);
        assert!((estimate.total - (estimate.compute_cost + estimate.storage_cost)).abs() < 1e-12);
    }

    #[test]
    fn zero_workers_costs_nothing() {
        let estimate = estimate_run_cost("m5.large", 0, 50.0, 0.05, 0.12);
        assert_eq!(estimate.compute_cost, 0.0);
        assert_eq!(estimate.storage_cost, 0.0);
        assert_eq!(estimate.total, 0.0);
    }

    #[test]
    fn estimate_is_finite_and_non_negative_with_fallback_price() {
        let estimate = estimate_run_cost("m5.large", 8, 100.0, 0.034, FALLBACK_STORAGE_PRICE);
        assert!(estimate.total.is_finite());
        assert!(estimate.total >= 0.0);
    }

    #[tokio::test]
    async fn unreachable_feed_falls_back_silently() {
        // Nothing listens on this port; the fetch must not error
        let price = fetch_storage_price("http://127.0.0.1:9/storage.json", "us-east-1").await;
        assert_eq!(price, FALLBACK_STORAGE_PRICE);
    }

    #[tokio::test]
    async fn bogus_url_falls_back_silently() {
        let price = fetch_storage_price("not a url at all", "us-east-1").await;
        assert_eq!(price, FALLBACK_STORAGE_PRICE);
    }
}

// libs/booking-cell/src/services/discount.rs
use anyhow::Result;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{DiscountConfig, DiscountQuote};

pub struct DiscountService {
    supabase: Arc<SupabaseClient>,
}

impl DiscountService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Price a selection for one procedure: fetch its active tiers and apply
    /// the resolution rule.
    pub async fn quote(
        &self,
        procedure_id: Uuid,
        selected_groups_count: i32,
        original_total: f64,
        auth_token: &str,
    ) -> Result<DiscountQuote> {
        let configs = self.fetch_active_configs(procedure_id, auth_token).await?;
        Ok(resolve_discount(
            &configs,
            selected_groups_count,
            original_total,
        ))
    }

    pub async fn fetch_active_configs(
        &self,
        procedure_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<DiscountConfig>> {
        let path = format!(
            "/rest/v1/discount_configs?procedure_id=eq.{}&is_active=eq.true&order=min_groups.asc",
            procedure_id
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let configs: Vec<DiscountConfig> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<DiscountConfig>, _>>()?;

        debug!(
            "Loaded {} active discount tiers for procedure {}",
            configs.len(),
            procedure_id
        );
        Ok(configs)
    }
}

/// Select the applicable tier and compute the payable total.
///
/// Among matching tiers the highest percentage wins; ties are broken by
/// percentage, not range specificity. No match means no discount.
/// `final_total + discount_amount` always reconstructs `original_total`.
pub fn resolve_discount(
    configs: &[DiscountConfig],
    selected_groups_count: i32,
    original_total: f64,
) -> DiscountQuote {
    let best = configs
        .iter()
        .filter(|c| c.matches(selected_groups_count))
        .max_by(|a, b| {
            a.discount_percentage
                .partial_cmp(&b.discount_percentage)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

    match best {
        Some(config) => {
            let discount_amount = original_total * config.discount_percentage / 100.0;
            DiscountQuote {
                original_total,
                discount_amount,
                final_total: original_total - discount_amount,
                discount_percentage: config.discount_percentage,
            }
        }
        None => DiscountQuote::none(original_total),
    }
}

/// Monetary amounts are rounded to 2 decimals for display only; stored
/// totals keep full precision.
pub fn round_display(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(min: i32, max: Option<i32>, pct: f64) -> DiscountConfig {
        DiscountConfig {
            id: Uuid::new_v4(),
            procedure_id: Uuid::new_v4(),
            min_groups: min,
            max_groups: max,
            discount_percentage: pct,
            is_active: true,
        }
    }

    #[test]
    fn two_specs_hit_the_ten_percent_tier() {
        // Specs priced 60 + 40 selected, tier {min:2, max:3, discount:10}.
        let configs = vec![tier(2, Some(3), 10.0)];
        let quote = resolve_discount(&configs, 2, 100.0);

        assert_eq!(quote.original_total, 100.0);
        assert_eq!(quote.discount_percentage, 10.0);
        assert_eq!(quote.discount_amount, 10.0);
        assert_eq!(quote.final_total, 90.0);
    }

    #[test]
    fn no_matching_tier_means_no_discount() {
        let configs = vec![tier(3, Some(5), 15.0)];
        assert_eq!(resolve_discount(&configs, 2, 200.0), DiscountQuote::none(200.0));
        assert_eq!(resolve_discount(&[], 4, 200.0), DiscountQuote::none(200.0));
    }

    #[test]
    fn inactive_tiers_are_ignored() {
        let mut inactive = tier(1, None, 50.0);
        inactive.is_active = false;
        let quote = resolve_discount(&[inactive], 2, 100.0);
        assert_eq!(quote.discount_percentage, 0.0);
    }

    #[test]
    fn unbounded_max_matches_any_larger_count() {
        let configs = vec![tier(5, None, 20.0)];
        assert_eq!(resolve_discount(&configs, 50, 100.0).discount_percentage, 20.0);
        assert_eq!(resolve_discount(&configs, 4, 100.0).discount_percentage, 0.0);
    }

    #[test]
    fn highest_percentage_wins_not_narrowest_range() {
        let configs = vec![tier(2, Some(2), 5.0), tier(1, None, 12.5)];
        let quote = resolve_discount(&configs, 2, 80.0);
        assert_eq!(quote.discount_percentage, 12.5);
    }

    #[test]
    fn percentage_is_monotone_in_group_count() {
        // Typical increasing ladder.
        let configs = vec![tier(1, Some(1), 0.0), tier(2, Some(3), 10.0), tier(4, None, 20.0)];
        let mut last = -1.0;
        for count in 1..=8 {
            let pct = resolve_discount(&configs, count, 100.0).discount_percentage;
            assert!(pct >= last, "discount dropped at count {}", count);
            last = pct;
        }
    }

    #[test]
    fn final_plus_discount_reconstructs_original() {
        let configs = vec![tier(2, None, 12.5)];
        for original in [100.0, 90.0, 64.0, 250.5, 1.25] {
            let q = resolve_discount(&configs, 3, original);
            assert_eq!(q.final_total + q.discount_amount, q.original_total);
        }
    }

    #[test]
    fn display_rounding_does_not_affect_stored_value() {
        let configs = vec![tier(1, None, 33.33)];
        let q = resolve_discount(&configs, 1, 100.0);
        assert_eq!(round_display(q.discount_amount), 33.33);
        // Full precision retained on the quote itself.
        assert_eq!(q.final_total + q.discount_amount, 100.0);
    }
}

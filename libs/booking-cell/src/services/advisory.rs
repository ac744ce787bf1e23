// libs/booking-cell/src/services/advisory.rs
use anyhow::Result;
use chrono::NaiveDate;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{AvailabilityAdvisory, CityAvailabilityWindow};

/// Non-authoritative check of where the provider is confirmed present.
/// Produces advisory text only; never blocks slots or submission.
pub struct AdvisoryService {
    supabase: Arc<SupabaseClient>,
}

impl AdvisoryService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn check(
        &self,
        date: NaiveDate,
        city_id: Uuid,
        auth_token: &str,
    ) -> Result<AvailabilityAdvisory> {
        let windows = self.fetch_windows_for_city(city_id, date, auth_token).await?;
        if windows.iter().any(|w| w.covers(date)) {
            return Ok(AvailabilityAdvisory::Available);
        }

        if let Some(city_name) = self
            .find_other_city_presence(city_id, date, auth_token)
            .await?
        {
            debug!("Provider is in {} on {}, not the requested city", city_name, date);
            return Ok(AvailabilityAdvisory::DifferentCity { city_name });
        }

        Ok(AvailabilityAdvisory::NotAvailable)
    }

    async fn fetch_windows_for_city(
        &self,
        city_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<CityAvailabilityWindow>> {
        let path = format!(
            "/rest/v1/city_availability_windows?city_id=eq.{}&date_start=lte.{}",
            city_id, date
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        Ok(result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<CityAvailabilityWindow>, _>>()?)
    }

    async fn find_other_city_presence(
        &self,
        city_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Option<String>> {
        #[derive(Deserialize)]
        struct WindowWithCity {
            #[serde(flatten)]
            window: CityAvailabilityWindow,
            cities: CityRow,
        }
        #[derive(Deserialize)]
        struct CityRow {
            name: String,
        }

        let path = format!(
            "/rest/v1/city_availability_windows?city_id=neq.{}&date_start=lte.{}\
             &select=*,cities(name)",
            city_id, date
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let rows: Vec<WindowWithCity> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<WindowWithCity>, _>>()?;

        Ok(rows
            .into_iter()
            .find(|row| row.window.covers(date))
            .map(|row| row.cities.name))
    }
}

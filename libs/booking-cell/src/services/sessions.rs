// libs/booking-cell/src/services/sessions.rs
use anyhow::Result;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::SessionAssignment;

/// Assigns the ordinal session number for multi-session procedure packages.
pub struct SessionTracker {
    supabase: Arc<SupabaseClient>,
}

impl SessionTracker {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Session numbers reflect booking order, not completion order, and are
    /// fixed before the appointment row is inserted. Canceling an earlier
    /// session never renumbers later ones.
    pub async fn assign(
        &self,
        client_id: Uuid,
        procedure_id: Uuid,
        sessions_required: i32,
        auth_token: &str,
    ) -> Result<SessionAssignment> {
        if sessions_required <= 1 {
            return Ok(SessionAssignment {
                session_number: 1,
                total_sessions: 1,
            });
        }

        let prior = self
            .count_prior_sessions(client_id, procedure_id, auth_token)
            .await?;

        debug!(
            "Client {} has {} prior sessions of procedure {}",
            client_id, prior, procedure_id
        );

        Ok(SessionAssignment {
            session_number: prior + 1,
            total_sessions: sessions_required,
        })
    }

    /// Non-canceled appointments of this client containing the exact
    /// procedure, in booking order.
    async fn count_prior_sessions(
        &self,
        client_id: Uuid,
        procedure_id: Uuid,
        auth_token: &str,
    ) -> Result<i32> {
        let path = format!(
            "/rest/v1/appointment_procedures?procedure_id=eq.{}\
             &select=appointment_id,appointments!inner(client_id,status,appointment_date)\
             &appointments.client_id=eq.{}&appointments.status=neq.canceled\
             &order=appointments(appointment_date).asc",
            procedure_id, client_id
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        Ok(result.len() as i32)
    }
}

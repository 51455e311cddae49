//! The inter-node JSON message protocol.
//!
//! Every message is tagged by `kind` and carries at minimum `{database,
//! table, row_id?, sequence?, payload?}`, per the specification's external
//! interfaces section. Receivers apply a mutation only if its `sequence` is
//! greater than the sequence they already hold for that row, making every
//! message idempotent under redelivery.

use crate::descriptor::NodeDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One message exchanged between nodes over the inter-node HTTP port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Message {
    #[serde(rename = "JOIN_CLUSTER")]
    JoinCluster { node: NodeDescriptor },

    #[serde(rename = "INSERT_ROW")]
    InsertRow {
        database: String,
        table: String,
        row_id: Uuid,
        sequence: u64,
        payload: Value,
    },

    #[serde(rename = "UPDATE_ROW")]
    UpdateRow {
        database: String,
        table: String,
        row_id: Uuid,
        sequence: u64,
        payload: Value,
    },

    #[serde(rename = "DELETE_ROW")]
    DeleteRow {
        database: String,
        table: String,
        row_id: Uuid,
        sequence: u64,
    },

    #[serde(rename = "CLAIM_ROW")]
    ClaimRow {
        database: String,
        table: String,
        row_id: Uuid,
        sequence: u64,
        payload: Value,
    },

    #[serde(rename = "PROBE")]
    Probe { from: NodeDescriptor },
}

impl Message {
    /// The `(database, table)` this message concerns, if any (`Probe` and
    /// `JoinCluster` are cluster-level and have none).
    #[must_use]
    pub fn table_ref(&self) -> Option<(&str, &str)> {
        match self {
            Message::InsertRow { database, table, .. }
            | Message::UpdateRow { database, table, .. }
            | Message::DeleteRow { database, table, .. }
            | Message::ClaimRow { database, table, .. } => Some((database, table)),
            Message::JoinCluster { .. } | Message::Probe { .. } => None,
        }
    }

    /// The row-id this message concerns, if any.
    #[must_use]
    pub fn row_id(&self) -> Option<Uuid> {
        match self {
            Message::InsertRow { row_id, .. }
            | Message::UpdateRow { row_id, .. }
            | Message::DeleteRow { row_id, .. }
            | Message::ClaimRow { row_id, .. } => Some(*row_id),
            Message::JoinCluster { .. } | Message::Probe { .. } => None,
        }
    }

    /// The sequence number this message carries, if any.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Message::InsertRow { sequence, .. }
            | Message::UpdateRow { sequence, .. }
            | Message::DeleteRow { sequence, .. }
            | Message::ClaimRow { sequence, .. } => Some(*sequence),
            Message::JoinCluster { .. } | Message::Probe { .. } => None,
        }
    }
}

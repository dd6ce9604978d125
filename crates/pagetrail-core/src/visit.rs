use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Desktop,
    Mobile,
    Tablet,
    Unknown,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Desktop => "desktop",
            Device::Mobile => "mobile",
            Device::Tablet => "tablet",
            Device::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "desktop" => Ok(Device::Desktop),
            "mobile" => Ok(Device::Mobile),
            "tablet" => Ok(Device::Tablet),
            "unknown" => Ok(Device::Unknown),
            other => Err(CoreError::InvalidDevice(other.to_string())),
        }
    }
}

/// One visit of one actor to one tracked route. Mirrors the `visits` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    pub visit_id: String,
    /// `None` for anonymous visits.
    pub user_key: Option<String>,
    pub route: String,
    pub device: Device,
    pub elapsed_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
    /// Set when the visit is superseded by reconciliation or swept as abandoned.
    pub closed_at: Option<DateTime<Utc>>,
}

impl VisitRecord {
    pub fn new(
        visit_id: impl Into<String>,
        user_key: Option<String>,
        route: impl Into<String>,
        device: Device,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            visit_id: visit_id.into(),
            user_key,
            route: route.into(),
            device,
            elapsed_seconds: 0,
            started_at: now,
            last_synced_at: now,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    pub fn is_logged_in(&self) -> bool {
        self.user_key.is_some()
    }
}

/// Payload of `POST /api/visits/begin`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BeginVisitRequest {
    #[serde(default)]
    pub user_key: Option<String>,
    pub visit_id: String,
    pub route: String,
    pub device: Device,
}

/// Payload of `POST /api/visits/update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateVisitRequest {
    pub visit_id: String,
    pub elapsed_seconds: u64,
}

/// Payload of `POST /api/visits/reconcile`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReconcileVisitsRequest {
    #[serde(default)]
    pub user_key: Option<String>,
}

/// Response of every ingestion operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestAck {
    pub ok: bool,
}

impl IngestAck {
    pub const OK: IngestAck = IngestAck { ok: true };
    pub const REJECTED: IngestAck = IngestAck { ok: false };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_round_trips_through_str() {
        for device in [Device::Desktop, Device::Mobile, Device::Tablet, Device::Unknown] {
            assert_eq!(device.as_str().parse::<Device>().ok(), Some(device));
        }
        assert!("phablet".parse::<Device>().is_err());
    }

    #[test]
    fn begin_request_uses_camel_case_wire_names() {
        let req: BeginVisitRequest = serde_json::from_str(
            r#"{"userKey":null,"visitId":"v1","route":"/about","device":"mobile"}"#,
        )
        .expect("parse begin request");
        assert_eq!(req.visit_id, "v1");
        assert_eq!(req.user_key, None);
        assert_eq!(req.device, Device::Mobile);
    }

    #[test]
    fn begin_request_user_key_may_be_omitted() {
        let req: BeginVisitRequest =
            serde_json::from_str(r#"{"visitId":"v1","route":"/","device":"desktop"}"#)
                .expect("parse begin request");
        assert!(req.user_key.is_none());
    }

    #[test]
    fn new_record_starts_open_at_zero() {
        let now = Utc::now();
        let record = VisitRecord::new("v1", Some("u1".into()), "/", Device::Desktop, now);
        assert_eq!(record.elapsed_seconds, 0);
        assert_eq!(record.started_at, record.last_synced_at);
        assert!(record.is_open());
        assert!(record.is_logged_in());
    }
}

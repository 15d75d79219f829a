// remote.rs

use crate::*;

const DEFAULT_TEMP_MIN: f32 = 40.0;
const DEFAULT_TEMP_MAX: f32 = 60.0;
const DEFAULT_MODE: &str = "invierno";

/// Thresholds and mode pushed from the broker side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub temp_min: f32,
    pub temp_max: f32,
    #[serde(rename = "estacion")]
    pub mode: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            temp_min: DEFAULT_TEMP_MIN,
            temp_max: DEFAULT_TEMP_MAX,
            mode: DEFAULT_MODE.into(),
        }
    }
}

/// Inbound configuration document. Absent fields leave the value alone.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ConfigPatch {
    pub temp_min: Option<f32>,
    pub temp_max: Option<f32>,
    #[serde(alias = "mode")]
    pub estacion: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config document: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("message on unexpected topic {0}")]
    Topic(String),
}

impl ConfigPatch {
    pub fn decode(payload: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn is_empty(&self) -> bool {
        self.temp_min.is_none() && self.temp_max.is_none() && self.estacion.is_none()
    }
}

impl RemoteConfig {
    /// Apply the fields present in `patch`. Returns whether anything changed.
    pub fn apply(&mut self, patch: ConfigPatch) -> bool {
        let before = self.clone();
        if let Some(v) = patch.temp_min {
            self.temp_min = v;
        }
        if let Some(v) = patch.temp_max {
            self.temp_max = v;
        }
        if let Some(v) = patch.estacion {
            self.mode = v;
        }
        *self != before
    }

    /// Handle one message from the response or update topic.
    ///
    /// On any error the current configuration is kept as it was.
    pub fn handle(&mut self, topics: &Topics, msg: &Inbound) -> Result<bool, ConfigError> {
        if msg.topic != topics.config_response && msg.topic != topics.config_update {
            return Err(ConfigError::Topic(msg.topic.clone()));
        }
        let patch = ConfigPatch::decode(&msg.payload)?;
        if patch.is_empty() {
            debug!("Config message on {} carries no known field", msg.topic);
        }
        let changed = self.apply(patch);
        if changed {
            info!(
                "Config updated: temp_min={} temp_max={} mode={}",
                self.temp_min, self.temp_max, self.mode
            );
        }
        Ok(changed)
    }
}

/// Body of the request sent on the request topic.
pub fn config_request_payload(identity: &DeviceIdentity) -> String {
    serde_json::json!({ "mac": identity.mac_colon() }).to_string()
}


// EOF

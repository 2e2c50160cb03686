//! Startup configuration from the assignment payload string
//!
//! The payload is a whitespace-separated list of `key` or `key=value`
//! tokens. Zones are six comma-separated floats: corner xyz followed by
//! dimensions xyz. Anything unparseable aborts startup.

use serde::{Deserialize, Serialize};

use es_core::{Aabb, EsError, EsResult, Vec3, Zones};

const KEY_DYNAMIC_JITTER: &str = "dynamic-jitter-buffer";
const KEY_SOURCE_ZONE: &str = "source-unattenuated-zone";
const KEY_LISTENER_ZONE: &str = "listener-unattenuated-zone";

/// Parsed mixer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MixerConfig {
    pub dynamic_jitter_buffers: bool,
    pub zones: Zones,
}

impl MixerConfig {
    /// Parse the startup payload. An empty payload yields the defaults.
    pub fn parse(payload: &str) -> EsResult<Self> {
        let mut config = MixerConfig::default();

        for token in payload.split_whitespace() {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (token, None),
            };

            match key {
                KEY_DYNAMIC_JITTER => {
                    config.dynamic_jitter_buffers = match value {
                        None | Some("true") => true,
                        Some("false") => false,
                        Some(other) => {
                            return Err(EsError::MalformedConfig(format!(
                                "{} expects true or false, got {:?}",
                                KEY_DYNAMIC_JITTER, other
                            )))
                        }
                    };
                }
                KEY_SOURCE_ZONE => {
                    config.zones.source_unattenuated_zone = Some(parse_zone(key, value)?);
                }
                KEY_LISTENER_ZONE => {
                    config.zones.listener_unattenuated_zone = Some(parse_zone(key, value)?);
                }
                other => {
                    return Err(EsError::MalformedConfig(format!(
                        "unknown key {:?}",
                        other
                    )));
                }
            }
        }

        Ok(config)
    }
}

fn parse_zone(key: &str, value: Option<&str>) -> EsResult<Aabb> {
    let value = value
        .ok_or_else(|| EsError::MalformedConfig(format!("{} requires a value", key)))?;

    let mut floats = [0.0f32; 6];
    let mut parts = value.split(',');
    for (i, slot) in floats.iter_mut().enumerate() {
        let part = parts
            .next()
            .ok_or_else(|| EsError::MalformedConfig(format!("{} needs 6 floats", key)))?;
        *slot = part.trim().parse::<f32>().map_err(|_| {
            EsError::MalformedConfig(format!("{} float {} is invalid: {:?}", key, i + 1, part))
        })?;
    }
    if parts.next().is_some() {
        return Err(EsError::MalformedConfig(format!(
            "{} needs exactly 6 floats",
            key
        )));
    }

    Ok(Aabb::new(
        Vec3::new(floats[0], floats[1], floats[2]),
        Vec3::new(floats[3], floats[4], floats[5]),
    ))
}

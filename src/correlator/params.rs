//! # Parameter Client
//!
//! PARAM_REQUEST_LIST / PARAM_REQUEST_READ / PARAM_SET with PARAM_VALUE
//! correlation.
//!
//! Only one read or write is outstanding at a time. A second caller waits for
//! the channel instead of overwriting the pending request.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::pending::{await_reply, PendingSlot};
use crate::error::{MavLinkError, Result};
use crate::link::{LinkHandle, ListenerId};
use crate::mavlink::messages::{
    ParamRequestList, ParamRequestRead, ParamSet, ParamValue, MAV_PARAM_TYPE_REAL32, PARAM_ID_LEN,
};

/// Parameter client tunables
#[derive(Debug, Clone, Copy)]
pub struct ParamClientConfig {
    /// Wait for each PARAM_VALUE
    pub timeout: Duration,

    /// Extra attempts after a timeout
    pub retries: u32,
}

impl Default for ParamClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1500),
            retries: 3,
        }
    }
}

/// Request/response client for the parameter channel
pub struct ParamClient {
    link: LinkHandle,
    slot: Arc<PendingSlot<ParamValue>>,
    channel: tokio::sync::Mutex<()>,
    listener: ListenerId,
    config: ParamClientConfig,
}

impl std::fmt::Debug for ParamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ParamClient {
    pub fn new(link: LinkHandle, config: ParamClientConfig) -> Self {
        let slot = Arc::new(PendingSlot::new());
        let offer = Arc::clone(&slot);
        let listener = link.dispatcher().on_param_value(move |_, value| {
            offer.offer(value);
        });

        Self {
            link,
            slot,
            channel: tokio::sync::Mutex::new(()),
            listener,
            config,
        }
    }

    /// Ask the autopilot to stream every parameter
    ///
    /// Fire-and-forget: values arrive through `on_param_value` listeners.
    pub async fn request_list(&self) -> Result<()> {
        let target = self.link.target();
        info!("Requesting full parameter list");
        self.link
            .send_message(&ParamRequestList {
                target_system: target.system_id,
                target_component: target.component_id,
            })
            .await
    }

    /// Read one parameter by its index
    ///
    /// # Errors
    ///
    /// Returns `Timeout` once every attempt went unanswered
    pub async fn read_by_index(&self, index: u16) -> Result<ParamValue> {
        let index_on_wire = i16::try_from(index).map_err(|_| {
            MavLinkError::Protocol(format!("Parameter index {} out of range", index))
        })?;
        let target = self.link.target();
        let request = ParamRequestRead {
            target_system: target.system_id,
            target_component: target.component_id,
            param_id: String::new(),
            param_index: index_on_wire,
        };

        self.round_trip(&request, move |value: &ParamValue| value.param_index == index)
            .await
    }

    /// Read one parameter by name
    pub async fn read_by_name(&self, name: &str) -> Result<ParamValue> {
        let name = wire_param_id(name)?;
        let target = self.link.target();
        let request = ParamRequestRead {
            target_system: target.system_id,
            target_component: target.component_id,
            param_id: name.clone(),
            param_index: -1,
        };

        self.round_trip(&request, move |value: &ParamValue| value.param_id == name)
            .await
    }

    /// Write a float parameter and return the value the autopilot echoes
    ///
    /// The echo may differ from the request when the autopilot clamps it.
    pub async fn set(&self, name: &str, value: f32) -> Result<ParamValue> {
        self.set_typed(name, value, MAV_PARAM_TYPE_REAL32).await
    }

    /// Write a parameter with an explicit MAV_PARAM_TYPE
    pub async fn set_typed(&self, name: &str, value: f32, param_type: u8) -> Result<ParamValue> {
        let name = wire_param_id(name)?;
        let target = self.link.target();
        let request = ParamSet {
            target_system: target.system_id,
            target_component: target.component_id,
            param_id: name.clone(),
            param_value: value,
            param_type,
        };

        let echo = self
            .round_trip(&request, move |value: &ParamValue| value.param_id == name)
            .await?;

        if echo.param_value != value {
            warn!(
                "Parameter {} set to {} but autopilot reports {}",
                echo.param_id, value, echo.param_value
            );
        }
        Ok(echo)
    }

    async fn round_trip<M, F>(&self, request: &M, matches: F) -> Result<ParamValue>
    where
        M: crate::mavlink::messages::MavPayload + Sync,
        F: Fn(&ParamValue) -> bool + Clone + Send + 'static,
    {
        let _channel = self.channel.lock().await;
        let attempts = self.config.retries + 1;

        for attempt in 1..=attempts {
            let rx = self.slot.arm(matches.clone());

            if let Err(e) = self.link.send_message(request).await {
                self.slot.clear();
                return Err(e);
            }

            match await_reply(rx, self.config.timeout, &self.link, "PARAM_VALUE").await {
                Ok(value) => {
                    debug!("{} = {} (attempt {})", value.param_id, value.param_value, attempt);
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!("{}: {}, retrying ({}/{})", M::NAME, e, attempt, attempts);
                }
                Err(e) => {
                    self.slot.clear();
                    return Err(e);
                }
            }
        }

        self.slot.clear();
        Err(MavLinkError::Timeout {
            operation: "PARAM_VALUE",
        })
    }
}

impl Drop for ParamClient {
    fn drop(&mut self) {
        self.link.dispatcher().unsubscribe(self.listener);
    }
}

/// Parameter id as it travels on the wire (16 chars max)
fn wire_param_id(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(MavLinkError::Protocol("Parameter name is empty".to_string()));
    }
    if !name.is_ascii() {
        return Err(MavLinkError::Protocol(format!(
            "Parameter name {:?} is not ASCII",
            name
        )));
    }
    Ok(name[..name.len().min(PARAM_ID_LEN)].to_string())
}

pub mod registry;
pub mod ws_server;

pub use registry::ConnectionRegistry;

use crate::backtest::model::PublicBacktest;
use crate::storage::entity::backtest_request;
use log::{debug, error};
use serde::Serialize;

pub const BACKTEST_UPDATE_EVENT: &str = "backtest.update";

#[derive(Serialize)]
struct Event<'a> {
    event: &'a str,
    data: PublicBacktest,
}

/// Pushes the public projection of a request to its owner's live connection, if any.
/// At-most-once: nothing is queued for offline owners.
#[derive(Clone)]
pub struct Notifier {
    registry: ConnectionRegistry,
}

impl Notifier {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub async fn publish(&self, model: &backtest_request::Model) -> bool {
        let text = match encode_update(model) {
            Ok(t) => t,
            Err(e) => {
                error!("failed to encode update for {}: {}", model.id, e);
                return false;
            }
        };
        let delivered = self.registry.send(&model.owner_id, text).await;
        if !delivered {
            debug!(
                "no live connection for {}, dropped {} update for {}",
                model.owner_id, model.status, model.id
            );
        }
        delivered
    }
}

pub fn encode_update(model: &backtest_request::Model) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Event {
        event: BACKTEST_UPDATE_EVENT,
        data: PublicBacktest::from(model),
    })
}

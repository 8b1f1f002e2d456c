//! Request dispatcher: raw request in, render session scheduled

use crate::driver::RenderDriver;
use crate::engine::EngineHost;
use crate::params::Params;
use crate::store::ResultStore;
use log::debug;

/// Entry point for transports.
///
/// Submissions return as soon as the session is scheduled on the current
/// tokio runtime; results show up in the [`ResultStore`] under the request id.
#[derive(Clone)]
pub struct Dispatcher {
    driver: RenderDriver,
}

impl Dispatcher {
    pub fn new(host: EngineHost, store: ResultStore) -> Self {
        Self {
            driver: RenderDriver::new(host, store),
        }
    }

    pub fn store(&self) -> &ResultStore {
        self.driver.store()
    }

    /// Decode `raw` and start one render session for it.
    ///
    /// A request that fails to decode is dropped: nothing is returned to the
    /// caller and no result is ever written for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, raw: &str) {
        match Params::decode(raw) {
            Ok(params) => self.submit_params(params),
            Err(e) => debug!("dropping request: {}", e),
        }
    }

    /// Start a render session for already-decoded params.
    pub fn submit_params(&self, params: Params) {
        debug!("scheduling session {} for {}", params.id, params.url);
        let driver = self.driver.clone();
        tokio::spawn(async move {
            driver.run(params).await;
        });
    }
}

//! Fabric context: feature negotiation and the configuration snapshot
//! workers are created from.

use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::SessionConfig;
use crate::config::validation::validate_fabric;
use crate::fabric::status::Status;
use crate::fabric::worker::WorkerParams;

/// Set of fabric features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Features(u32);

impl Features {
    pub const EMPTY: Features = Features(0);
    /// Tag-matched send/receive.
    pub const TAG: Features = Features(1 << 0);
    /// Ordered byte stream. Recognised in configs; no operations use it yet.
    pub const STREAM: Features = Features(1 << 1);

    pub fn from_name(name: &str) -> Option<Features> {
        match name.trim().to_ascii_lowercase().as_str() {
            "tag" => Some(Features::TAG),
            "stream" => Some(Features::STREAM),
            _ => None,
        }
    }

    pub fn contains(&self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: Features) -> Features {
        Features(self.0 | other.0)
    }
}

/// Parameters a caller passes when creating a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    /// Features the caller is going to use.
    pub features: Features,
    /// Whether workers may be driven from several threads.
    pub mt_workers_shared: bool,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            features: Features::TAG,
            mt_workers_shared: true,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ContextShared {
    pub features: Features,
    pub mt_workers_shared: bool,
    pub worker_defaults: WorkerParams,
}

/// Root fabric object. Workers keep its shared state alive.
#[derive(Debug)]
pub struct Context {
    shared: Arc<ContextShared>,
}

impl Context {
    /// Create a context from caller parameters and a configuration.
    ///
    /// Only the fabric sections of `config` are checked. Fails with
    /// `InvalidParam` for an invalid one or an empty feature request, and with `Unsupported` when a requested feature is
    /// not enabled by the configuration.
    pub fn init(params: &ContextParams, config: &SessionConfig) -> Result<Context, Status> {
        if let Err(errors) = validate_fabric(config) {
            for err in &errors {
                tracing::error!(error = %err, "Invalid fabric configuration");
            }
            return Err(Status::InvalidParam);
        }
        if params.features.is_empty() {
            tracing::error!("Context requested without any feature");
            return Err(Status::InvalidParam);
        }

        let enabled = config
            .context
            .features
            .iter()
            .filter_map(|name| Features::from_name(name))
            .fold(Features::EMPTY, Features::union);
        if !enabled.contains(params.features) {
            tracing::error!(
                requested = ?params.features,
                enabled = ?enabled,
                "Requested features are not enabled"
            );
            return Err(Status::Unsupported);
        }

        let worker_defaults = WorkerParams {
            progress_batch: config.worker.progress_batch,
            rx_chunk_size: config.worker.rx_chunk_size,
            max_message_size: config.worker.max_message_size,
            max_unexpected: config.worker.max_unexpected,
            connect_timeout: Duration::from_millis(config.endpoint.connect_timeout_ms),
            tcp_nodelay: config.endpoint.tcp_nodelay,
        };

        tracing::debug!(
            features = ?params.features,
            mt_workers_shared = params.mt_workers_shared && config.context.mt_workers_shared,
            "Context initialized"
        );

        Ok(Context {
            shared: Arc::new(ContextShared {
                features: params.features,
                mt_workers_shared: params.mt_workers_shared && config.context.mt_workers_shared,
                worker_defaults,
            }),
        })
    }

    /// Features negotiated for this context.
    pub fn features(&self) -> Features {
        self.shared.features
    }

    pub fn mt_workers_shared(&self) -> bool {
        self.shared.mt_workers_shared
    }

    /// Worker parameters derived from the configuration.
    pub fn worker_defaults(&self) -> WorkerParams {
        self.shared.worker_defaults.clone()
    }

    pub(crate) fn shared(&self) -> Arc<ContextShared> {
        Arc::clone(&self.shared)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        tracing::trace!("Context cleaned up");
    }
}

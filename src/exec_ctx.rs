//! Execution context shared by the gateway and the executor.
//!
//! [`ExecCtx`] carries the transport, credential store, engine config,
//! cancellation token and optional event handler. Build it once and share it
//! across runs.

use crate::config::EngineConfig;
use crate::credentials::{CredentialStore, StaticCredentials};
use crate::error::{FlowError, Result};
use crate::events::{self, Event, EventHandler};
use crate::transport::{ReqwestTransport, Transport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared execution context.
///
/// # Example
///
/// ```
/// use llm_flow::{ExecCtx, StaticCredentials, Provider};
/// use std::sync::Arc;
///
/// let ctx = ExecCtx::builder()
///     .credentials(Arc::new(StaticCredentials::new().with_secret(Provider::OpenAi, "sk-...")))
///     .build()
///     .unwrap();
/// assert!(!ctx.is_cancelled());
/// ```
#[derive(Clone)]
pub struct ExecCtx {
    pub transport: Arc<dyn Transport>,
    pub credentials: Arc<dyn CredentialStore>,
    pub config: EngineConfig,
    /// Cancelling this token stops every stream started under the context.
    pub cancel: CancellationToken,
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    pub fn builder() -> ExecCtxBuilder {
        ExecCtxBuilder::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Return an error if cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn emit(&self, event: Event) {
        events::emit(&self.event_handler, event);
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("transport", &self.transport.name())
            .field("config", &self.config)
            .field("cancelled", &self.is_cancelled())
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`ExecCtx`].
#[derive(Default)]
pub struct ExecCtxBuilder {
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    config: EngineConfig,
    cancel: Option<CancellationToken>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtxBuilder {
    /// Set the transport. Default: [`ReqwestTransport`] bounded by
    /// `config.request_timeout()`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the credential store. Default: an empty [`StaticCredentials`].
    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Validate the config and build the context.
    pub fn build(self) -> Result<ExecCtx> {
        self.config.validate()?;
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::with_timeout(self.config.request_timeout())?),
        };
        Ok(ExecCtx {
            transport,
            credentials: self
                .credentials
                .unwrap_or_else(|| Arc::new(StaticCredentials::new())),
            config: self.config,
            cancel: self.cancel.unwrap_or_default(),
            event_handler: self.event_handler,
        })
    }
}

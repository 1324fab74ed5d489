//! HTTP surface: tide-disco modules for the consumer API, the adapter-facing
//! webhooks, and operational status. Route shapes live in the TOML files under
//! `api/`.

use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt};
use ied_types::{Event, PublishRequest, Status, SubscribeRequest};
use tide_disco::{
    api::ApiError,
    error::ServerError,
    method::{ReadState, WriteState},
    Api, App, Error as _, StatusCode,
};
use vbs::version::StaticVersionType;

use crate::{context::BrokerContext, EngineError, IedApiVersion};

// Everything behind a `BrokerContext` is shared and internally synchronized,
// so handlers read and write through plain clones of the handle set rather
// than an outer lock. This keeps slow fan-outs in one request from stalling
// every other request.
#[async_trait]
impl ReadState for BrokerContext {
    type State = Self;

    async fn read<T>(
        &self,
        op: impl Send + for<'a> FnOnce(&'a Self::State) -> BoxFuture<'a, T> + 'async_trait,
    ) -> T {
        op(self).await
    }
}

#[async_trait]
impl WriteState for BrokerContext {
    async fn write<T>(
        &self,
        op: impl Send + for<'a> FnOnce(&'a mut Self::State) -> BoxFuture<'a, T> + 'async_trait,
    ) -> T {
        let mut state = self.clone();
        op(&mut state).await
    }
}

fn server_error(err: EngineError) -> ServerError {
    let status = match &err {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::MissingGlobalId
        | EngineError::AdapterUnavailable(..)
        | EngineError::AdapterRejected(..)
        | EngineError::AllAdaptersFailed
        | EngineError::ConsumerWebhookFailed(_)
        | EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    ServerError::catch_all(status, err.to_string())
}

/// Consumer-facing publish/subscribe routes, mounted under `/api`.
fn define_consumer_api<Ver: StaticVersionType + 'static>(
    _: Ver,
) -> Result<Api<BrokerContext, ServerError, Ver>, ApiError> {
    let toml: toml::Value = toml::from_str(include_str!("../api/consumer.toml"))
        .map_err(|err| ApiError::CannotReadToml {
            reason: err.to_string(),
        })?;
    let mut api = Api::<BrokerContext, ServerError, Ver>::new(toml)?;

    api.post("publishevent", |req, state| {
        async move {
            let body = req
                .body_auto::<PublishRequest, Ver>(Ver::instance())
                .map_err(ServerError::from_request_error)?;
            body.validate().map_err(server_error)?;
            state.publish_event(body).await.map_err(server_error)
        }
        .boxed()
    })?
    .post("subscribe", |req, state| {
        async move {
            let body = req
                .body_auto::<SubscribeRequest, Ver>(Ver::instance())
                .map_err(ServerError::from_request_error)?;
            state.subscribe(body).await.map_err(server_error)
        }
        .boxed()
    })?
    .get("subscriptions", |_req, state| {
        async move { Ok(state.list_subscriptions()) }.boxed()
    })?;

    Ok(api)
}

/// Adapter-facing webhooks, mounted under `/internal`. Both acknowledge
/// immediately and run the risky work detached, so a slow ledger can never
/// back the adapters up against the engine.
fn define_internal_api<Ver: StaticVersionType + 'static>(
    _: Ver,
) -> Result<Api<BrokerContext, ServerError, Ver>, ApiError> {
    let toml: toml::Value = toml::from_str(include_str!("../api/internal.toml"))
        .map_err(|err| ApiError::CannotReadToml {
            reason: err.to_string(),
        })?;
    let mut api = Api::<BrokerContext, ServerError, Ver>::new(toml)?;

    api.post("eventnotification", |req, state| {
        async move {
            let adapter = req
                .string_param("adapter")
                .map_err(ServerError::from_request_error)?
                .to_string();
            let event = req
                .body_auto::<Event, Ver>(Ver::instance())
                .map_err(ServerError::from_request_error)?;
            state.spawn_event_notification(adapter, event);
            Ok(())
        }
        .boxed()
    })?
    .post("desmosnotification", |req, state| {
        async move {
            let event = req
                .body_auto::<Event, Ver>(Ver::instance())
                .map_err(ServerError::from_request_error)?;
            state.spawn_consumer_notification(event);
            Ok(())
        }
        .boxed()
    })?;

    Ok(api)
}

/// Operational routes, mounted under `/status`.
fn define_status_api<Ver: StaticVersionType + 'static>(
    _: Ver,
) -> Result<Api<BrokerContext, ServerError, Ver>, ApiError> {
    let toml: toml::Value = toml::from_str(include_str!("../api/status.toml"))
        .map_err(|err| ApiError::CannotReadToml {
            reason: err.to_string(),
        })?;
    let mut api = Api::<BrokerContext, ServerError, Ver>::new(toml)?;

    api.get("health", |_req, state| {
        async move {
            let health = state.health().await;
            if health.status == Status::Up {
                Ok(health)
            } else {
                Err(ServerError::catch_all(
                    StatusCode::SERVICE_UNAVAILABLE,
                    serde_json::to_string(&health)
                        .unwrap_or_else(|_| format!("{:?}", health.status)),
                ))
            }
        }
        .boxed()
    })?
    .get("stats", |_req, state| {
        async move { state.stats().await.map_err(server_error) }.boxed()
    })?;

    Ok(api)
}

/// Assemble the app and serve until shutdown.
pub async fn serve(
    port: u16,
    context: BrokerContext,
    bind_version: IedApiVersion,
) -> anyhow::Result<()> {
    let mut app = App::<BrokerContext, ServerError>::with_state(context);
    app.register_module("api", define_consumer_api(bind_version)?)?;
    app.register_module("internal", define_internal_api(bind_version)?)?;
    app.register_module("status", define_status_api(bind_version)?)?;

    tracing::info!(port, "serving interchain event distributor");
    app.serve(format!("0.0.0.0:{port}"), bind_version).await?;
    Ok(())
}

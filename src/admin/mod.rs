//! Thin JSON/HTTP surface for registration, heartbeats, discovery, custom
//! record management, and upstream reconfiguration. Business logic lives in
//! [`crate::registry`]; handlers here only translate HTTP <-> domain calls.

use std::sync::Arc;

use poem::listener::TcpListener;
use poem::web::{Data, Json, Path, Query};
use poem::{get, handler, post, put, Endpoint, EndpointExt, IntoResponse, Response, Route, Server};
use poem::http::StatusCode;
use serde_derive::Deserialize;

use crate::dns::metrics::MetricsCollector;
use crate::dns::upstream::UPSTREAM_CONFIG_KEY;
use crate::model::{CustomRecord, RecordType, ServiceDnsAssociation, ServiceInstance};
use crate::registry::namespace::NamespaceStore;
use crate::registry::records::RecordStore;
use crate::registry::{Registry, RegistryError};
use crate::store::StoreClient;

pub struct AdminState {
    pub registry: Arc<Registry>,
    pub namespaces: Arc<NamespaceStore>,
    pub records: Arc<RecordStore>,
    pub store: Arc<dyn StoreClient>,
    pub metrics: Arc<MetricsCollector>,
}

fn registry_error_response(err: RegistryError) -> Response {
    let status = match err {
        RegistryError::NotFound => StatusCode::NOT_FOUND,
        RegistryError::AlreadyExists => StatusCode::CONFLICT,
        RegistryError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        RegistryError::NamespaceNotEmpty => StatusCode::CONFLICT,
        RegistryError::Store(_) | RegistryError::Encoding(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    Response::builder()
        .status(status)
        .body(err.to_string())
}

#[handler]
async fn register(data: Data<&Arc<AdminState>>, Json(instance): Json<ServiceInstance>) -> Response {
    match data.registry.register(instance).await {
        Ok(registered) => {
            data.metrics.record_registry_operation("register", "success");
            Json(registered).into_response()
        }
        Err(e) => {
            data.metrics.record_registry_operation("register", "failure");
            registry_error_response(e)
        }
    }
}

#[handler]
async fn deregister(data: Data<&Arc<AdminState>>, Path(instance_id): Path<String>) -> Response {
    match data.registry.deregister(&instance_id).await {
        Ok(()) => Response::builder().status(StatusCode::NO_CONTENT).finish(),
        Err(e) => registry_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct HeartbeatBody {
    ttl_seconds: Option<u64>,
}

#[handler]
async fn heartbeat(
    data: Data<&Arc<AdminState>>,
    Path(instance_id): Path<String>,
    Json(body): Json<HeartbeatBody>,
) -> Response {
    match data.registry.update_heartbeat(&instance_id, body.ttl_seconds).await {
        Ok(instance) => Json(instance).into_response(),
        Err(e) => registry_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    namespace: Option<String>,
    name: Option<String>,
}

#[handler]
async fn list_instances(data: Data<&Arc<AdminState>>, Query(q): Query<ListQuery>) -> Response {
    let result = match (q.namespace, q.name) {
        (Some(ns), Some(name)) => data.registry.list_by_name(&ns, &name).await,
        (Some(ns), None) => data.registry.list_by_namespace(&ns).await,
        _ => data.registry.list_all().await,
    };
    match result {
        Ok(instances) => Json(instances).into_response(),
        Err(e) => registry_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct CreateNamespaceBody {
    name: String,
    #[serde(default)]
    description: String,
}

#[handler]
async fn create_namespace(data: Data<&Arc<AdminState>>, Json(body): Json<CreateNamespaceBody>) -> Response {
    match data.namespaces.create(&body.name, &body.description).await {
        Ok(ns) => Json(ns).into_response(),
        Err(e) => registry_error_response(e),
    }
}

#[handler]
async fn list_namespaces(data: Data<&Arc<AdminState>>) -> Response {
    match data.namespaces.list().await {
        Ok(namespaces) => Json(namespaces).into_response(),
        Err(e) => registry_error_response(e),
    }
}

#[handler]
async fn delete_namespace(data: Data<&Arc<AdminState>>, Path(name): Path<String>) -> Response {
    match data.namespaces.delete(&name).await {
        Ok(()) => Response::builder().status(StatusCode::NO_CONTENT).finish(),
        Err(e) => registry_error_response(e),
    }
}

#[handler]
async fn upsert_record(data: Data<&Arc<AdminState>>, Json(record): Json<CustomRecord>) -> Response {
    match data.records.upsert_record(record).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => registry_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct RecordQuery {
    domain: String,
    record_type: RecordType,
}

#[handler]
async fn delete_record(data: Data<&Arc<AdminState>>, Query(q): Query<RecordQuery>) -> Response {
    match data.records.delete_record(&q.domain, q.record_type).await {
        Ok(()) => Response::builder().status(StatusCode::NO_CONTENT).finish(),
        Err(e) => registry_error_response(e),
    }
}

#[handler]
async fn list_records(data: Data<&Arc<AdminState>>, Query(q): Query<RecordQuery>) -> Response {
    match data.records.list_records_for_domain(&q.domain).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => registry_error_response(e),
    }
}

#[handler]
async fn upsert_association(
    data: Data<&Arc<AdminState>>,
    Json(assoc): Json<ServiceDnsAssociation>,
) -> Response {
    match data.records.upsert_association(assoc).await {
        Ok(assoc) => Json(assoc).into_response(),
        Err(e) => registry_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct SetUpstreamsBody {
    upstreams: Vec<String>,
}

/// Writes the new upstream list to `/config/dns/upstream_dns`. The DNS
/// server's upstream pool picks it up through its own watch, on this process
/// and every other one watching the same key — it is never mutated directly
/// from here.
#[handler]
async fn set_upstreams(data: Data<&Arc<AdminState>>, Json(body): Json<SetUpstreamsBody>) -> Response {
    let parsed: std::result::Result<Vec<std::net::SocketAddr>, _> =
        body.upstreams.iter().map(|s| s.parse()).collect();
    if let Err(e) = parsed {
        return Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(e.to_string());
    }

    let value = match serde_json::to_vec(&body.upstreams) {
        Ok(v) => v,
        Err(e) => {
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(e.to_string())
        }
    };

    match data.store.put(UPSTREAM_CONFIG_KEY, value).await {
        Ok(()) => Response::builder().status(StatusCode::NO_CONTENT).finish(),
        Err(e) => Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(e.to_string()),
    }
}

#[handler]
async fn metrics(data: Data<&Arc<AdminState>>) -> Response {
    match data.metrics.export_metrics() {
        Ok(body) => Response::builder()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(e.to_string()),
    }
}

pub fn router(state: Arc<AdminState>) -> impl Endpoint {
    Route::new()
        .at("/v1/services", post(register).get(list_instances))
        .at("/v1/services/:instance_id", poem::delete(deregister))
        .at("/v1/services/:instance_id/heartbeat", post(heartbeat))
        .at("/v1/namespaces", post(create_namespace).get(list_namespaces))
        .at("/v1/namespaces/:name", poem::delete(delete_namespace))
        .at("/v1/records", put(upsert_record).get(list_records).delete(delete_record))
        .at("/v1/associations", put(upsert_association))
        .at("/v1/upstreams", post(set_upstreams))
        .at("/metrics", get(metrics))
        .data(state)
}

pub async fn serve(port: u16, state: Arc<AdminState>) -> std::io::Result<()> {
    tracing::info!(port, "admin http listener started");
    Server::new(TcpListener::bind(("0.0.0.0", port)))
        .run(router(state))
        .await
}

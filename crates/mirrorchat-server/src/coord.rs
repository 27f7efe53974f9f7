//! Coordinator endpoints.
//!
//! One node can host the shared ID counter and the durable snapshot store
//! for the whole cluster. The other nodes reach them through
//! [`HttpCounter`](crate::counter::HttpCounter) and
//! [`HttpDurableStore`](crate::durable::HttpDurableStore).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use mirrorchat_store::{EntityKind, SnapshotKey};

use crate::counter::CounterService;
use crate::durable::DurableStore;
use crate::error::ServerError;

/// Snapshot blobs hold the whole store, so the default body limit is too small.
const MAX_BLOB_SIZE: usize = 512 * 1024 * 1024;

#[derive(Clone)]
pub struct CoordState {
    pub counter: Arc<dyn CounterService>,
    pub blobs: Arc<dyn DurableStore>,
}

pub fn coord_router(state: CoordState) -> Router {
    Router::new()
        .route("/coord/counter/:key", post(next_id))
        .route("/coord/blob/:key", get(get_blob).put(put_blob))
        .layer(DefaultBodyLimit::max(MAX_BLOB_SIZE))
        .with_state(state)
}

fn snapshot_key(key: &str) -> Result<SnapshotKey, ServerError> {
    SnapshotKey::ALL
        .into_iter()
        .find(|k| k.as_str() == key)
        .ok_or_else(|| ServerError::NotFound(format!("blob {key:?}")))
}

async fn next_id(
    State(state): State<CoordState>,
    Path(key): Path<String>,
) -> Result<Json<i64>, ServerError> {
    let kind = EntityKind::from_counter_key(&key)
        .ok_or_else(|| ServerError::NotFound(format!("counter {key:?}")))?;
    Ok(Json(state.counter.next_id(kind).await?))
}

async fn get_blob(
    State(state): State<CoordState>,
    Path(key): Path<String>,
) -> Result<Vec<u8>, ServerError> {
    let key = snapshot_key(&key)?;
    state
        .blobs
        .get(key)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("blob {key}")))
}

async fn put_blob(
    State(state): State<CoordState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ServerError> {
    let key = snapshot_key(&key)?;
    state.blobs.put(key, body.to_vec()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounter;
    use crate::durable::MemoryDurableStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        coord_router(CoordState {
            counter: Arc::new(MemoryCounter::new().starting_at(EntityKind::Message, 42)),
            blobs: Arc::new(MemoryDurableStore::new()),
        })
    }

    fn request(method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(body).unwrap()
    }

    async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_counter_increments_per_kind() {
        let app = app();
        let key = EntityKind::Message.counter_key();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let resp = app
                .clone()
                .oneshot(request("POST", &format!("/coord/counter/{key}"), Body::empty()))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            ids.push(serde_json::from_slice::<i64>(&body_bytes(resp).await).unwrap());
        }
        assert_eq!(ids, vec![42, 43]);
    }

    #[tokio::test]
    async fn test_unknown_counter_key() {
        let resp = app()
            .oneshot(request("POST", "/coord/counter/bogus", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_blob_absent_then_stored() {
        let app = app();

        let resp = app
            .clone()
            .oneshot(request("GET", "/coord/blob/users", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .clone()
            .oneshot(request("PUT", "/coord/blob/users", Body::from(vec![1u8, 2, 3])))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app
            .oneshot(request("GET", "/coord/blob/users", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unknown_blob_key() {
        let resp = app()
            .oneshot(request("PUT", "/coord/blob/secrets", Body::from("x")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

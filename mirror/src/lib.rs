//! HTTP API for the livestate mirror.
//!
//! The mirror keeps one engine connected to a live stream and exposes the
//! latest committed snapshot to clients that cannot hold a socket open.

use std::sync::Arc;
use axum::{extract::State, response::Json, routing::get, Router};
use livestate_sync::{ConnectionState, EngineStats, StreamingEngine};
use livestate_types::{Link, Schema, Timestamp};
use serde::Serialize;

#[derive(Serialize, Clone, Debug)]
pub struct HealthResponse {
    pub schema: &'static str,
    pub engine_id: String,
    pub connection: ConnectionState,
    pub version: u64,
    pub entities: usize,
    pub relations: usize,
    pub stats: EngineStats,
}

/// A snapshot with relations addressed by entity position instead of key.
#[derive(Serialize, Clone, Debug)]
#[serde(bound = "")]
pub struct IndexedSnapshot<S: Schema> {
    pub version: u64,
    pub timestamp: Timestamp,
    pub entities: Vec<S::Entity>,
    pub relations: Vec<Link<usize>>,
}

type Engine<S> = Arc<StreamingEngine<S>>;

async fn health_handler<S: Schema>(State(engine): State<Engine<S>>) -> Json<HealthResponse> {
    let snapshot = engine.get_state();
    Json(HealthResponse {
        schema: S::NAME,
        engine_id: engine.id().to_string(),
        connection: engine.connection_state(),
        version: snapshot.version,
        entities: snapshot.len(),
        relations: snapshot.relation_count(),
        stats: engine.stats(),
    })
}

async fn snapshot_handler<S: Schema>(
    State(engine): State<Engine<S>>,
) -> Json<livestate_sync::Snapshot<S>> {
    Json(engine.get_state().as_ref().clone())
}

async fn indexed_handler<S: Schema>(State(engine): State<Engine<S>>) -> Json<IndexedSnapshot<S>> {
    let snapshot = engine.get_state();
    Json(IndexedSnapshot {
        version: snapshot.version,
        timestamp: snapshot.timestamp,
        entities: snapshot.entities.clone(),
        relations: snapshot.indexed_relations(),
    })
}

/// Build the HTTP API router over a running engine.
pub fn build_router<S: Schema>(engine: Engine<S>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler::<S>))
        .route("/api/v1/snapshot", get(snapshot_handler::<S>))
        .route("/api/v1/snapshot/indexed", get(indexed_handler::<S>))
        .with_state(engine)
}

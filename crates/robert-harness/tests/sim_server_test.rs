//! Tests for the simulated server's protocol checks and determinism.

use robert_client::{ApiError, ServerApi, Session, SessionConfig};
use robert_core::{MemoryProximityStore, MemorySessionStore, env::Environment};
use robert_harness::{Endpoint, SimEnv, SimServer};
use robert_proto::{
    ContactPayload, StatusRequest, b64_encode,
    time::{encode_time, ntp_time32},
};

type TestSession = Session<SimServer, MemorySessionStore, MemoryProximityStore, SimEnv>;

fn open_session(env: &SimEnv, server: &SimServer) -> TestSession {
    let session = Session::open(
        server.clone(),
        MemorySessionStore::new(),
        MemoryProximityStore::new(),
        env.clone(),
        SessionConfig::default(),
    )
    .unwrap();
    server.add_captcha("id", "answer");
    session
}

fn status_request(ebid: [u8; 8], epoch_id: u32, env: &SimEnv) -> StatusRequest {
    StatusRequest {
        ebid: b64_encode(&ebid),
        epoch_id,
        time: encode_time(ntp_time32(env.wall_clock_secs())),
        mac: b64_encode(&[0u8; 32]),
        contacts: ContactPayload::List(Vec::new()),
    }
}

#[tokio::test]
async fn forged_mac_is_rejected() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let session = open_session(&env, &server);
    session.register("id", "answer").await.unwrap();

    let epoch = session.broadcast_identifier(env.wall_clock_secs()).unwrap();
    let err = server.status(&status_request(epoch.ebid, epoch.index, &env)).await.unwrap_err();

    assert!(matches!(err, ApiError::Rejected { status: 401, .. }));
}

#[tokio::test]
async fn epoch_id_must_match_ebid() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let session = open_session(&env, &server);
    session.register("id", "answer").await.unwrap();

    let epoch = session.broadcast_identifier(env.wall_clock_secs()).unwrap();
    let err =
        server.status(&status_request(epoch.ebid, epoch.index + 1, &env)).await.unwrap_err();

    assert_eq!(err, ApiError::Rejected { status: 401, message: "epoch mismatch".into() });
}

#[tokio::test]
async fn unregistered_ebids_are_unknown() {
    let env = SimEnv::new();
    let server = SimServer::new(env.clone());
    let session = open_session(&env, &server);
    session.register("id", "answer").await.unwrap();
    let epoch = session.broadcast_identifier(env.wall_clock_secs()).unwrap();

    session.unregister().await.unwrap();
    let err = server.status(&status_request(epoch.ebid, epoch.index, &env)).await.unwrap_err();

    assert!(matches!(err, ApiError::Rejected { status: 404, .. }));
    assert_eq!(server.calls(Endpoint::Status), 1);
}

/// Same seeds must yield the same key exchange and the same epoch material,
/// so failing simulation runs can be replayed.
#[tokio::test]
async fn registration_is_deterministic_per_seed() {
    let mut broadcasts = Vec::new();
    for _ in 0..2 {
        let env = SimEnv::with_seed(42);
        let server = SimServer::new(env.clone());
        let session = open_session(&env, &server);
        session.register("id", "answer").await.unwrap();
        broadcasts.push(session.broadcast_identifier(env.wall_clock_secs()).unwrap());
    }

    assert_eq!(broadcasts[0], broadcasts[1]);
}

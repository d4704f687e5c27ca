//! Client against a real server bound on loopback.

use aquarium_client::{
    ApiClient, FileSessionStore, IdeaRemote, LocalCache, SessionProvider, SyncCoordinator,
    SyncOutcome,
};
use aquarium_core::IdeaDraft;
use aquarium_core::config::{AppConfig, StoreConfig};
use aquarium_server::{AppState, create_router};
use aquarium_store::{RecordStore, SqliteStore};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

struct Running {
    api: ApiClient,
    _server: tokio::task::JoinHandle<()>,
    _temp: TempDir,
}

async fn start_server(modifier: impl FnOnce(&mut AppConfig)) -> Running {
    let temp = tempfile::tempdir().unwrap();
    let db_path = temp.path().join("server.db");
    let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::new(&db_path, None).await.unwrap());
    let mut config = AppConfig {
        store: StoreConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        },
        ..AppConfig::for_testing()
    };
    modifier(&mut config);
    let app = create_router(AppState::new(config, store));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Running {
        api: ApiClient::new(&format!("http://{addr}/v1")).unwrap(),
        _server: server,
        _temp: temp,
    }
}

fn coordinator(api: &ApiClient, dir: &TempDir) -> (SyncCoordinator, Arc<FileSessionStore>) {
    let sessions = Arc::new(FileSessionStore::new(
        dir.path().join("session.json"),
        api.clone(),
    ));
    let coordinator = SyncCoordinator::new(
        LocalCache::new(dir.path().join("ideas.json")),
        Arc::new(api.clone()),
        sessions.clone(),
        Duration::from_secs(3600),
    );
    (coordinator, sessions)
}

fn draft(name: &str) -> IdeaDraft {
    IdeaDraft {
        name: name.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn offline_ideas_reach_a_second_device() {
    if !can_bind_localhost() {
        eprintln!("Skipping loopback tests: cannot bind to localhost");
        return;
    }
    let running = start_server(|_| {}).await;
    let api = &running.api;
    api.sign_up("koi@example.com", "hunter22", "Koi").await.unwrap();

    // Device A works offline, then signs in.
    let device_a = tempfile::tempdir().unwrap();
    let (a, _) = coordinator(api, &device_a);
    a.restore().await.unwrap();
    a.create(draft("Angelfish")).await.unwrap();
    a.create(draft("Betta")).await.unwrap();

    let session = api.sign_in("koi@example.com", "hunter22").await.unwrap();
    let outcome = a.sign_in(session.clone()).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Merged {
            total: 2,
            pulled: 0,
            pushed: 2
        }
    );
    a.shutdown().await;

    let on_server = api.list_ideas(&session.access_token).await.unwrap();
    assert_eq!(on_server.len(), 2);

    // Device B also worked offline and reused id "1"; the server copy wins.
    let device_b = tempfile::tempdir().unwrap();
    let (b, _) = coordinator(api, &device_b);
    b.restore().await.unwrap();
    assert_eq!(b.create(draft("Cichlid")).await.unwrap().id, "1");

    let session_b = api.sign_in("koi@example.com", "hunter22").await.unwrap();
    b.sign_in(session_b).await.unwrap();
    let mut names: Vec<String> = b.ideas().await.into_iter().map(|i| i.name).collect();
    names.sort();
    assert_eq!(names, vec!["Angelfish", "Betta"]);

    // Signed-in creates get timestamp ids and are mirrored.
    let danio = b.create(draft("Danio")).await.unwrap();
    assert_ne!(danio.id, "3");
    b.shutdown().await;

    // A restarts, resumes its session and pulls B's idea.
    let (a_again, _) = coordinator(api, &device_a);
    a_again.restore().await.unwrap();
    assert!(a_again.is_signed_in().await);
    a_again.shutdown().await;
    let ideas = a_again.ideas().await;
    assert_eq!(ideas.len(), 3);
    assert!(ideas.iter().any(|i| i.id == danio.id));
}

#[tokio::test]
async fn expired_access_token_is_refreshed_once() {
    if !can_bind_localhost() {
        eprintln!("Skipping loopback tests: cannot bind to localhost");
        return;
    }
    let running = start_server(|config| config.auth.access_token_ttl_secs = 1).await;
    let api = &running.api;
    api.sign_up("betta@example.com", "hunter22", "").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let (c, sessions) = coordinator(api, &dir);
    c.restore().await.unwrap();
    let session = api.sign_in("betta@example.com", "hunter22").await.unwrap();
    c.sign_in(session.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(api.whoami(&session.access_token).await.is_err());

    let outcome = c.sync(true).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Merged { .. }));
    assert!(c.is_signed_in().await);

    let refreshed = sessions.current().await.unwrap().unwrap();
    assert_ne!(refreshed.access_token, session.access_token);
    assert_ne!(refreshed.refresh_token, session.refresh_token);
    c.shutdown().await;
}

#[tokio::test]
async fn clear_all_and_sign_out_round_trip() {
    if !can_bind_localhost() {
        eprintln!("Skipping loopback tests: cannot bind to localhost");
        return;
    }
    let running = start_server(|_| {}).await;
    let api = &running.api;
    api.sign_up("oscar@example.com", "hunter22", "").await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let (c, sessions) = coordinator(api, &dir);
    c.restore().await.unwrap();
    let session = api.sign_in("oscar@example.com", "hunter22").await.unwrap();
    c.sign_in(session).await.unwrap();

    c.create(draft("One")).await.unwrap();
    c.create(draft("Two")).await.unwrap();
    c.shutdown().await;
    assert_eq!(
        c.sync_now().await.unwrap(),
        SyncOutcome::Merged {
            total: 2,
            pulled: 2,
            pushed: 0
        }
    );

    assert_eq!(c.clear_all().await.unwrap(), 2);
    c.shutdown().await;
    let credential = sessions.current().await.unwrap().unwrap().access_token;
    assert!(api.list_ideas(&credential).await.unwrap().is_empty());

    c.sign_out().await.unwrap();
    assert!(!c.is_signed_in().await);
    assert!(sessions.current().await.unwrap().is_none());
    // The revoked credential no longer works.
    assert!(api.whoami(&credential).await.is_err());
}

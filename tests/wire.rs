use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use convene::model::ConflictMode;
use convene::server;
use convene::tenant::TenantManager;

const DAY: i64 = 1_717_372_800_000; // 2024-06-03T00:00:00Z
const MINUTE: i64 = 60_000;

fn at(hour: i64, minute: i64) -> i64 {
    DAY + hour * 60 * MINUTE + minute * MINUTE
}

// ── Test infrastructure ──────────────────────────────────────

struct TestServer {
    addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

async fn start_test_server(mode: ConflictMode) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("convene_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, mode));

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        server::run(listener, tm, None, 16, async {
            let _ = rx.await;
        })
        .await;
    });

    TestServer {
        addr,
        _shutdown: tx,
    }
}

async fn connect(addr: SocketAddr, db: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user("convene");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn ids(rows: &[SimpleQueryRow]) -> Vec<i64> {
    rows.iter()
        .map(|r| r.get("id").unwrap().parse().unwrap())
        .collect()
}

fn insert_sql(id: i64, emails: &[&str], start: i64, end: i64) -> String {
    let participants: Vec<String> = emails
        .iter()
        .map(|e| format!(r#"{{"name":"{e}","email":"{e}","rsvp":"yes"}}"#))
        .collect();
    format!(
        "INSERT INTO meetings (id, title, participants, start_time, end_time) VALUES ({id}, 'meeting {id}', '[{}]', {start}, {end})",
        participants.join(",")
    )
}

async fn sqlstate_of(client: &tokio_postgres::Client, sql: &str) -> SqlState {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().cloned().unwrap()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_conflict_then_other_participant() {
    let server = start_test_server(ConflictMode::StartInstant).await;
    let client = connect(server.addr, "test").await;

    let complete = client
        .simple_query(&insert_sql(1, &["a@x.com"], at(10, 0), at(11, 0)))
        .await
        .unwrap();
    assert!(complete
        .iter()
        .any(|m| matches!(m, SimpleQueryMessage::CommandComplete(1))));

    let state = sqlstate_of(&client, &insert_sql(2, &["a@x.com"], at(10, 30), at(11, 30))).await;
    assert_eq!(state, SqlState::EXCLUSION_VIOLATION);

    client
        .simple_query(&insert_sql(3, &["b@y.com"], at(10, 30), at(11, 30)))
        .await
        .unwrap();

    let found = rows(&client, "SELECT * FROM meetings WHERE participant = 'a@x.com'").await;
    assert_eq!(ids(&found), vec![1]);
}

#[tokio::test]
async fn select_returns_full_documents() {
    let server = start_test_server(ConflictMode::StartInstant).await;
    let client = connect(server.addr, "test").await;

    let returned = rows(
        &client,
        &format!("{} RETURNING _id", insert_sql(7, &["a@x.com"], at(9, 0), at(9, 30))),
    )
    .await;
    assert_eq!(returned.len(), 1);
    let doc_id = returned[0].get("_id").unwrap().to_string();
    assert!(Ulid::from_string(&doc_id).is_ok());

    let found = rows(&client, "SELECT * FROM meetings WHERE id = 7").await;
    assert_eq!(found.len(), 1);
    let row = &found[0];
    assert_eq!(row.get("_id"), Some(doc_id.as_str()));
    assert_eq!(row.get("title"), Some("meeting 7"));
    assert_eq!(row.get("start_time"), Some(at(9, 0).to_string().as_str()));
    assert_eq!(row.get("end_time"), Some(at(9, 30).to_string().as_str()));
    let created: i64 = row.get("creation_timestamp").unwrap().parse().unwrap();
    assert!(created > 0);

    let participants: serde_json::Value =
        serde_json::from_str(row.get("participants").unwrap()).unwrap();
    assert_eq!(
        participants,
        serde_json::json!([{"name": "a@x.com", "email": "a@x.com", "rsvp": "yes"}])
    );
}

#[tokio::test]
async fn participant_query_honors_limit() {
    let server = start_test_server(ConflictMode::StartInstant).await;
    let client = connect(server.addr, "test").await;

    for (i, hour) in [8, 12, 16].into_iter().enumerate() {
        client
            .simple_query(&insert_sql(i as i64, &["a@x.com"], at(hour, 0), at(hour, 45)))
            .await
            .unwrap();
    }

    let all = rows(&client, "SELECT * FROM meetings WHERE participant = 'a@x.com'").await;
    assert_eq!(ids(&all), vec![0, 1, 2]);
    let one = rows(&client, "SELECT * FROM meetings WHERE participant = 'a@x.com' LIMIT 1").await;
    assert_eq!(ids(&one), vec![0]);
}

#[tokio::test]
async fn time_range_requires_containment() {
    let server = start_test_server(ConflictMode::StartInstant).await;
    let client = connect(server.addr, "test").await;

    client
        .simple_query(&insert_sql(1, &["a@x.com"], at(9, 0), at(10, 0)))
        .await
        .unwrap();
    client
        .simple_query(&insert_sql(2, &["b@y.com"], at(9, 30), at(11, 0)))
        .await
        .unwrap();

    let sql = format!(
        "SELECT * FROM meetings WHERE start_time >= {} AND end_time <= {}",
        at(9, 0),
        at(10, 0)
    );
    assert_eq!(ids(&rows(&client, &sql).await), vec![1]);

    let rfc = "SELECT * FROM meetings WHERE start_time >= '2024-06-03T00:00:00Z' AND end_time <= '2024-06-03T23:59:59Z'";
    assert_eq!(ids(&rows(&client, rfc).await), vec![1, 2]);
}

#[tokio::test]
async fn overlap_mode_rejects_meetings_that_start_earlier() {
    let server = start_test_server(ConflictMode::Overlap).await;
    let client = connect(server.addr, "test").await;

    client
        .simple_query(&insert_sql(1, &["a@x.com"], at(10, 0), at(11, 0)))
        .await
        .unwrap();
    let state = sqlstate_of(&client, &insert_sql(2, &["a@x.com"], at(9, 30), at(10, 30))).await;
    assert_eq!(state, SqlState::EXCLUSION_VIOLATION);
}

#[tokio::test]
async fn batch_insert_is_all_or_nothing() {
    let server = start_test_server(ConflictMode::StartInstant).await;
    let client = connect(server.addr, "test").await;

    let batch = format!(
        "INSERT INTO meetings (id, participants, start_time, end_time) VALUES \
         (1, '[{{\"name\":\"A\",\"email\":\"a@x.com\",\"rsvp\":\"yes\"}}]', {}, {}), \
         (2, '[{{\"name\":\"A\",\"email\":\"a@x.com\",\"rsvp\":\"yes\"}}]', {}, {})",
        at(10, 0),
        at(11, 0),
        at(10, 15),
        at(10, 45)
    );
    let state = sqlstate_of(&client, &batch).await;
    assert_eq!(state, SqlState::EXCLUSION_VIOLATION);
    assert!(rows(&client, "SELECT * FROM meetings WHERE participant = 'a@x.com'").await.is_empty());

    let ok_batch = batch.replace(&at(10, 15).to_string(), &at(12, 0).to_string());
    let ok_batch = ok_batch.replace(&at(10, 45).to_string(), &at(12, 30).to_string());
    let returned = rows(&client, &format!("{ok_batch} RETURNING _id")).await;
    assert_eq!(returned.len(), 2);
    let found = rows(&client, "SELECT * FROM meetings WHERE participant = 'a@x.com'").await;
    assert_eq!(ids(&found), vec![1, 2]);
}

#[tokio::test]
async fn caller_errors_map_to_sqlstates() {
    let server = start_test_server(ConflictMode::StartInstant).await;
    let client = connect(server.addr, "test").await;

    let inverted = insert_sql(1, &["a@x.com"], at(11, 0), at(10, 0));
    assert_eq!(
        sqlstate_of(&client, &inverted).await,
        SqlState::INVALID_PARAMETER_VALUE
    );
    assert_eq!(
        sqlstate_of(&client, "SELECT * FROM meetings WHERE id = 1 LIMIT 0").await,
        SqlState::INVALID_PARAMETER_VALUE
    );
    assert_eq!(
        sqlstate_of(&client, "SELECT * FROM meetings").await,
        SqlState::SYNTAX_ERROR
    );
    assert_eq!(
        sqlstate_of(&client, "DROP TABLE meetings").await,
        SqlState::SYNTAX_ERROR
    );

    // The connection survives every rejected statement.
    assert!(rows(&client, "SELECT * FROM meetings WHERE id = 1").await.is_empty());
}

#[tokio::test]
async fn databases_are_isolated_tenants() {
    let server = start_test_server(ConflictMode::StartInstant).await;
    let alpha = connect(server.addr, "alpha").await;
    let beta = connect(server.addr, "beta").await;

    alpha
        .simple_query(&insert_sql(1, &["a@x.com"], at(10, 0), at(11, 0)))
        .await
        .unwrap();
    beta.simple_query(&insert_sql(2, &["a@x.com"], at(10, 0), at(11, 0)))
        .await
        .unwrap();

    let in_alpha = rows(&alpha, "SELECT * FROM meetings WHERE participant = 'a@x.com'").await;
    let in_beta = rows(&beta, "SELECT * FROM meetings WHERE participant = 'a@x.com'").await;
    assert_eq!(ids(&in_alpha), vec![1]);
    assert_eq!(ids(&in_beta), vec![2]);
}

#[tokio::test]
async fn extended_protocol_with_parameters() {
    let server = start_test_server(ConflictMode::StartInstant).await;
    let client = connect(server.addr, "test").await;

    let participants = r#"[{"name":"Cleo","email":"c@z.com","rsvp":"maybe"}]"#;
    let start = at(14, 0).to_string();
    let end = at(15, 0).to_string();
    let inserted = client
        .execute(
            "INSERT INTO meetings (id, title, participants, start_time, end_time) VALUES ($1, $2, $3, $4, $5)",
            &[&"10", &"Planning", &participants, &start, &end],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let found = client
        .query(
            "SELECT * FROM meetings WHERE participant = $1 LIMIT $2",
            &[&"c@z.com", &"5"],
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get::<_, i64>("id"), 10);
    assert_eq!(found[0].get::<_, String>("title"), "Planning");
    assert_eq!(found[0].get::<_, i64>("start_time"), at(14, 0));
}

#[tokio::test]
async fn concurrent_clients_book_one_slot_once() {
    let server = start_test_server(ConflictMode::StartInstant).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let addr = server.addr;
        handles.push(tokio::spawn(async move {
            let client = connect(addr, "test").await;
            client
                .simple_query(&insert_sql(i, &["busy@x.com"], at(10, 0), at(11, 0)))
                .await
                .is_ok()
        }));
    }

    let mut committed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            committed += 1;
        }
    }
    assert_eq!(committed, 1);

    let client = connect(server.addr, "test").await;
    let found = rows(&client, "SELECT * FROM meetings WHERE participant = 'busy@x.com'").await;
    assert_eq!(found.len(), 1);
}

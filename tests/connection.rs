//! End-to-end tests against the scripted server in `common`.

mod common;

use pretty_assertions::assert_eq;
use tokio::io::duplex;

use common::*;
use qail_mysql::driver::Ping;
use qail_mysql::protocol::CapabilityFlags;
use qail_mysql::protocol::auth::{
    caching_sha2_password, mysql_native_password, xor_password_with_seed,
};
use qail_mysql::protocol::messages::{
    COM_PING, COM_QUERY, COM_QUIT, COM_STMT_CLOSE, COM_STMT_EXECUTE, COM_STMT_PREPARE,
};
use qail_mysql::{MySqlConfig, MySqlConnection, MySqlError, MySqlValue, TlsMode};
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey};
use sha1::Sha1;

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

async fn connect(script: impl FnOnce(MockServer) -> tokio::task::JoinHandle<()>) -> (MySqlConnection, tokio::task::JoinHandle<()>) {
    let (client, server) = duplex(64 * 1024);
    let server = script(MockServer::new(server));
    let conn = MySqlConnection::connect_stream(client, &config())
        .await
        .expect("connect");
    (conn, server)
}

#[tokio::test]
async fn select_one_over_native_password() {
    let (conn, server) = connect(|mut server| {
        tokio::spawn(async move {
            let response = server.accept().await;
            assert!(contains(&response, b"app\0"));
            assert!(contains(&response, &mysql_native_password(PASSWORD.as_bytes(), &SEED)));
            assert!(contains(&response, b"mysql_native_password\0"));

            let query = server.expect_command(COM_QUERY).await;
            assert_eq!(&query[1..], b"SELECT 1");
            server
                .send_all(
                    1,
                    &[
                        column_count(1),
                        column_def("1", 0x08),
                        text_row(&[Some("1")]),
                        result_end(SERVER_STATUS_AUTOCOMMIT),
                    ],
                )
                .await;
            server.expect_command(COM_QUIT).await;
        })
    })
    .await;

    assert_eq!(conn.session().connection_id, 42);
    assert_eq!(conn.session().server_version, "8.0.36");

    let rows = conn.simple_query("SELECT 1").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_i64(0), Some(1));
    assert_eq!(rows[0].columns()[0].name, "1");

    conn.close().await.unwrap();
    assert!(conn.is_closed());
    server.await.unwrap();
}

#[tokio::test]
async fn caching_sha2_fast_auth() {
    let (client, server_end) = duplex(64 * 1024);
    let server = tokio::spawn(async move {
        let mut server = MockServer::new(server_end);
        server.send(0, &greeting("caching_sha2_password")).await;
        let (_, response) = server.read_packet().await.unwrap();
        assert!(contains(&response, &caching_sha2_password(PASSWORD.as_bytes(), &SEED)));
        server.send(2, &[0x01, 0x03]).await;
        server.send(3, &ok(0, 0, SERVER_STATUS_AUTOCOMMIT)).await;

        server.expect_command(COM_PING).await;
        server.send(1, &ok(0, 0, SERVER_STATUS_AUTOCOMMIT)).await;
    });

    let conn = MySqlConnection::connect_stream(client, &config()).await.unwrap();
    conn.ping().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn prepared_insert_reports_last_insert_id() {
    let (conn, server) = connect(|mut server| {
        tokio::spawn(async move {
            server.accept().await;

            let prepare = server.expect_command(COM_STMT_PREPARE).await;
            assert_eq!(&prepare[1..], b"INSERT INTO users (name, age) VALUES (?, ?)");
            server
                .send_all(
                    1,
                    &[prepare_ok(5, 0, 2), column_def("?", 0xfd), column_def("?", 0xfd)],
                )
                .await;

            let execute = server.expect_command(COM_STMT_EXECUTE).await;
            assert_eq!(&execute[1..5], &5u32.to_le_bytes());
            assert!(contains(&execute, b"\x05alice"));
            server.send(1, &ok(1, 1001, SERVER_STATUS_AUTOCOMMIT)).await;

            let close = server.expect_command(COM_STMT_CLOSE).await;
            assert_eq!(&close[1..], &5u32.to_le_bytes());
        })
    })
    .await;

    let result = conn
        .query(
            "INSERT INTO users (name, age) VALUES (?, ?)",
            &[MySqlValue::from("alice"), MySqlValue::from(31i32)],
        )
        .await
        .unwrap();
    assert!(result.rows.is_empty());
    assert_eq!(result.metadata.affected_rows, 1);
    assert_eq!(result.metadata.last_insert_id, 1001);
    server.await.unwrap();
}

#[tokio::test]
async fn prepared_select_decodes_binary_rows() {
    let (conn, server) = connect(|mut server| {
        tokio::spawn(async move {
            server.accept().await;

            server.expect_command(COM_STMT_PREPARE).await;
            server
                .send_all(
                    1,
                    &[
                        prepare_ok(9, 2, 1),
                        column_def("?", 0x08),
                        column_def("id", 0x08),
                        column_def("name", 0xfd),
                    ],
                )
                .await;

            server.expect_command(COM_STMT_EXECUTE).await;
            let mut row = vec![0x00, 0b0000_0000];
            row.extend_from_slice(&7i64.to_le_bytes());
            row.extend_from_slice(b"\x03bob");
            let mut null_name = vec![0x00, 0b0000_1000];
            null_name.extend_from_slice(&8i64.to_le_bytes());
            server
                .send_all(
                    1,
                    &[
                        column_count(2),
                        column_def("id", 0x08),
                        column_def("name", 0xfd),
                        row,
                        null_name,
                        result_end(SERVER_STATUS_AUTOCOMMIT),
                    ],
                )
                .await;
            server.expect_command(COM_STMT_CLOSE).await;
        })
    })
    .await;

    let result = conn
        .query("SELECT id, name FROM users WHERE id > ?", &[5i64.into()])
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].column("id").and_then(|v| v.as_i64()), Some(7));
    assert_eq!(result.rows[0].get_string(1).as_deref(), Some("bob"));
    assert_eq!(result.rows[1].get_i64(0), Some(8));
    assert!(result.rows[1].is_null(1));
    server.await.unwrap();
}

#[tokio::test]
async fn commands_complete_in_submission_order() {
    let (conn, server) = connect(|mut server| {
        tokio::spawn(async move {
            server.accept().await;
            for (sql, reply) in [
                ("UPDATE a SET x = 1", ok(1, 0, SERVER_STATUS_AUTOCOMMIT)),
                ("UPDATE b SET", err(1064, "42000", "You have an error in your SQL syntax")),
                ("UPDATE c SET x = 1", ok(3, 0, SERVER_STATUS_AUTOCOMMIT)),
            ] {
                let query = server.expect_command(COM_QUERY).await;
                assert_eq!(&query[1..], sql.as_bytes());
                server.send(1, &reply).await;
            }
        })
    })
    .await;

    let (a, b, c) = tokio::join!(
        conn.execute("UPDATE a SET x = 1"),
        conn.execute("UPDATE b SET"),
        conn.execute("UPDATE c SET x = 1"),
    );
    assert_eq!(a.unwrap().affected_rows, 1);
    match b {
        Err(MySqlError::InvalidSyntax(e)) => assert_eq!(e.code, 1064),
        other => panic!("expected syntax error, got {:?}", other),
    }
    assert_eq!(c.unwrap().affected_rows, 3);
    server.await.unwrap();
}

#[tokio::test]
async fn multi_statement_sums_affected_rows() {
    let (conn, server) = connect(|mut server| {
        tokio::spawn(async move {
            server.accept().await;
            server.expect_command(COM_QUERY).await;
            server
                .send_all(
                    1,
                    &[
                        ok(2, 0, SERVER_STATUS_AUTOCOMMIT | SERVER_MORE_RESULTS_EXISTS),
                        column_count(1),
                        column_def("n", 0x08),
                        text_row(&[Some("5")]),
                        result_end(SERVER_STATUS_AUTOCOMMIT | SERVER_MORE_RESULTS_EXISTS),
                        ok(3, 77, SERVER_STATUS_AUTOCOMMIT),
                    ],
                )
                .await;
        })
    })
    .await;

    let metadata = conn
        .execute("DELETE FROM a; SELECT COUNT(*) AS n FROM a; INSERT INTO a VALUES (1),(2),(3)")
        .await
        .unwrap();
    assert_eq!(metadata.affected_rows, 5);
    assert_eq!(metadata.last_insert_id, 77);
    server.await.unwrap();
}

#[tokio::test]
async fn close_fails_pending_commands() {
    let (conn, server) = connect(|mut server| {
        tokio::spawn(async move {
            server.accept().await;
            server.expect_command(COM_PING).await;
            // Never answer; the client gives up and quits.
            server.expect_command(COM_QUIT).await;
            assert!(server.read_packet().await.is_none());
        })
    })
    .await;

    let handles: Vec<_> = (0..3).map(|_| conn.submit(Ping).unwrap()).collect();
    tokio::task::yield_now().await;
    conn.close().await.unwrap();
    for handle in handles {
        assert!(matches!(handle.await, Err(MySqlError::Closed)));
    }
    assert!(conn.is_closed());
    assert!(matches!(conn.submit(Ping), Err(MySqlError::Closed)));
    server.await.unwrap();
}

#[tokio::test]
async fn server_hangup_fails_active_command() {
    let (conn, server) = connect(|mut server| {
        tokio::spawn(async move {
            server.accept().await;
            server.expect_command(COM_QUERY).await;
            server.shutdown().await;
        })
    })
    .await;

    let result = conn.simple_query("SELECT SLEEP(10)").await;
    assert!(matches!(result, Err(MySqlError::Closed)));
    server.await.unwrap();
}

#[tokio::test]
async fn access_denied_fails_connect() {
    let (client, server_end) = duplex(64 * 1024);
    let server = tokio::spawn(async move {
        let mut server = MockServer::new(server_end);
        server.send(0, &greeting("mysql_native_password")).await;
        server.read_packet().await.unwrap();
        server
            .send(2, &err(1045, "28000", "Access denied for user 'app'@'localhost'"))
            .await;
    });

    let result = MySqlConnection::connect_stream(client, &config()).await;
    match result {
        Err(MySqlError::Server(e)) => {
            assert_eq!(e.code, 1045);
            assert_eq!(e.sql_state.as_deref(), Some("28000"));
        }
        other => panic!("expected access denied, got {:?}", other.map(|_| ())),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn out_of_order_sequence_is_fatal() {
    let (conn, server) = connect(|mut server| {
        tokio::spawn(async move {
            server.accept().await;
            server.expect_command(COM_PING).await;
            server.send(5, &ok(0, 0, SERVER_STATUS_AUTOCOMMIT)).await;
        })
    })
    .await;

    assert!(matches!(conn.ping().await, Err(MySqlError::Closed)));
    server.await.unwrap();
}

fn tls_config() -> MySqlConfig {
    MySqlConfig::builder()
        .user("app")
        .password(PASSWORD)
        .tls_mode(TlsMode::Require)
        .accept_invalid_certs(true)
        .build()
}

#[tokio::test]
async fn tls_upgrade_then_full_auth_in_cleartext() {
    let (client, server_end) = duplex(64 * 1024);
    let server = tokio::spawn(async move {
        let mut server = MockServer::new(server_end);
        let caps = server_capabilities() | CapabilityFlags::SSL;
        server.send(0, &greeting_with("caching_sha2_password", caps)).await;

        let (sequence, ssl_request) = server.read_packet().await.expect("ssl request");
        assert_eq!(sequence, 1);
        assert_eq!(ssl_request.len(), 32);
        let requested = u32::from_le_bytes([ssl_request[0], ssl_request[1], ssl_request[2], ssl_request[3]]);
        assert_ne!(requested & CapabilityFlags::SSL.lower(), 0);

        let mut server = server.start_tls().await;
        let (sequence, response) = server.read_packet().await.expect("handshake response");
        assert_eq!(sequence, 2);
        assert!(contains(&response, b"app\0"));

        // Cache miss: the password may travel in cleartext over TLS.
        server.send(3, &[0x01, 0x04]).await;
        let (sequence, password) = server.read_packet().await.expect("password");
        assert_eq!(sequence, 4);
        assert_eq!(password, b"secret\0");
        server.send(5, &ok(0, 0, SERVER_STATUS_AUTOCOMMIT)).await;

        server.expect_command(COM_PING).await;
        server.send(1, &ok(0, 0, SERVER_STATUS_AUTOCOMMIT)).await;
        server.expect_command(COM_QUIT).await;
    });

    let conn = MySqlConnection::connect_stream(client, &tls_config()).await.unwrap();
    assert!(conn.session().capabilities.contains(CapabilityFlags::SSL));
    conn.ping().await.unwrap();
    conn.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn require_tls_fails_without_server_support() {
    let (client, server_end) = duplex(64 * 1024);
    let server = tokio::spawn(async move {
        let mut server = MockServer::new(server_end);
        server.send(0, &greeting("mysql_native_password")).await;
        // The client hangs up instead of answering in plaintext.
        assert!(server.read_packet().await.is_none());
    });

    let result = MySqlConnection::connect_stream(client, &tls_config()).await;
    assert!(matches!(result, Err(MySqlError::SecureConnectionRequired)));
    server.await.unwrap();
}

#[tokio::test]
async fn caching_sha2_full_auth_with_server_public_key() {
    let (client, server_end) = duplex(64 * 1024);
    let server = tokio::spawn(async move {
        let mut server = MockServer::new(server_end);
        server.send(0, &greeting("caching_sha2_password")).await;
        server.read_packet().await.expect("handshake response");
        server.send(2, &[0x01, 0x04]).await;

        let (sequence, request) = server.read_packet().await.expect("public key request");
        assert_eq!(sequence, 3);
        assert_eq!(request, vec![0x02u8]);
        let mut key_packet = vec![0x01];
        key_packet.extend_from_slice(RSA_PUBLIC_KEY);
        server.send(4, &key_packet).await;

        let (sequence, encrypted) = server.read_packet().await.expect("encrypted password");
        assert_eq!(sequence, 5);
        let pem = std::str::from_utf8(RSA_PRIVATE_KEY).unwrap();
        let key = RsaPrivateKey::from_pkcs8_pem(pem).unwrap();
        let decrypted = key.decrypt(Oaep::new::<Sha1>(), &encrypted).unwrap();
        assert_eq!(decrypted, xor_password_with_seed(PASSWORD.as_bytes(), &SEED));
        server.send(6, &ok(0, 0, SERVER_STATUS_AUTOCOMMIT)).await;

        server.expect_command(COM_PING).await;
        server.send(1, &ok(0, 0, SERVER_STATUS_AUTOCOMMIT)).await;
    });

    let conn = MySqlConnection::connect_stream(client, &config()).await.unwrap();
    conn.ping().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn auth_switch_to_native_password() {
    let new_seed: Vec<u8> = (0x41..0x55).collect();
    let expected = mysql_native_password(PASSWORD.as_bytes(), &new_seed);
    let (client, server_end) = duplex(64 * 1024);
    let server = tokio::spawn(async move {
        let mut server = MockServer::new(server_end);
        server.send(0, &greeting("caching_sha2_password")).await;
        let (_, response) = server.read_packet().await.expect("handshake response");
        assert!(contains(&response, b"caching_sha2_password\0"));

        server.send(2, &auth_switch("mysql_native_password", &new_seed)).await;
        let (sequence, switched) = server.read_packet().await.expect("switch response");
        assert_eq!(sequence, 3);
        assert_eq!(switched, expected.to_vec());
        server.send(4, &ok(0, 0, SERVER_STATUS_AUTOCOMMIT)).await;

        server.expect_command(COM_PING).await;
        server.send(1, &ok(0, 0, SERVER_STATUS_AUTOCOMMIT)).await;
    });

    let conn = MySqlConnection::connect_stream(client, &config()).await.unwrap();
    conn.ping().await.unwrap();
    server.await.unwrap();
}

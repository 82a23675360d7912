#[cfg(test)]
mod tests {
    use crate::mock::MockServer;
    use crate::{generate_client_name, Client, ClientConfig, ResqlError, Value};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use resql_protocol::backend::{encode_error_response, ResponseWriter};
    use resql_protocol::buffer::CursorBuffer;
    use resql_protocol::messages::{ParamKey, ResultCode, StatementSource, Task};
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn config(urls: Vec<String>) -> ClientConfig {
        ClientConfig::new(urls)
            .with_name("test-client")
            .with_timeout(Duration::from_secs(5))
            .with_retry_interval(Duration::from_millis(10))
    }

    async fn dead_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        format!("tcp://{addr}")
    }

    #[tokio::test]
    async fn first_connect_adopts_server_sequence() {
        let server = MockServer::start().await;
        server.state().sequence = 41;
        let mut client = Client::connect(config(vec![server.url()])).await.expect("connect");
        assert_eq!(client.sequence(), 41);
        assert_eq!(client.name(), "test-client");

        client.put_statement("INSERT INTO t VALUES(1)");
        client.execute(false).await.expect("write");
        client.put_statement("SELECT * FROM t");
        client.execute(true).await.expect("read");

        let state = server.state();
        assert_eq!(state.requests.len(), 2);
        assert_eq!((state.requests[0].sequence, state.requests[0].readonly), (42, false));
        assert_eq!((state.requests[1].sequence, state.requests[1].readonly), (42, true));
    }

    #[tokio::test]
    async fn mutating_batches_get_consecutive_sequences() {
        let server = MockServer::start().await;
        let mut client = Client::connect(config(vec![server.url()])).await.expect("connect");
        for i in 0..5 {
            client
                .put_statement("INSERT INTO t VALUES(:n)")
                .bind_by_name(":n", i);
            client.execute(false).await.expect("execute");
        }
        let sequences: Vec<u64> = server.state().requests.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
        assert_eq!(client.sequence(), 5);
    }

    #[tokio::test]
    async fn bound_values_survive_the_round_trip() {
        let server = MockServer::start().await;
        let mut client = Client::connect(config(vec![server.url()])).await.expect("connect");
        client
            .put_statement("SELECT :a, :b, :c, :d, :e")
            .bind_by_name(":a", 7i64)
            .bind_by_name(":b", 1.25)
            .bind_by_name(":c", "text")
            .bind_by_name(":d", vec![9u8, 8, 7])
            .bind_by_name(":e", Option::<i64>::None);
        let mut rs = client.execute(true).await.expect("execute");
        let row = rs.next_row().expect("row").expect("some");
        let a: Option<i64> = row.get(":a").expect("a");
        let b: Option<f64> = row.get(":b").expect("b");
        let c: Option<&str> = row.get(":c").expect("c");
        let d: Option<&[u8]> = row.get(":d").expect("d");
        let e: Option<i64> = row.get(":e").expect("e");
        assert_eq!(a, Some(7));
        assert_eq!(b, Some(1.25));
        assert_eq!(c, Some("text"));
        assert_eq!(d, Some(&[9u8, 8, 7][..]));
        assert_eq!(e, None);
    }

    #[tokio::test]
    async fn index_bindings_are_sent_by_position() {
        let server = MockServer::start().await;
        let mut client = Client::connect(config(vec![server.url()])).await.expect("connect");
        client
            .put_statement("INSERT INTO t VALUES(?, ?)")
            .bind_by_index(0, "key")
            .bind_by_index(1, Value::Null);
        client.execute(false).await.expect("execute");
        let state = server.state();
        let Task::Statement { params, .. } = &state.requests[0].tasks[0] else {
            panic!("expected a statement");
        };
        assert_eq!(params[0].key, ParamKey::Index(0));
        assert_eq!(params[1].value, Value::Null);
    }

    #[tokio::test]
    async fn batch_yields_one_result_set_per_statement() {
        let server = MockServer::start().await;
        server.respond_with(|req, out| {
            assert_eq!(req.tasks.len(), 3);
            let mut writer = ResponseWriter::begin(out)?;
            writer.begin_result_set(0, 0)?;
            writer.columns(&["key", "value"])?;
            writer.row(&[Value::Text("jane".into()), Value::Integer(400)])?;
            writer.begin_result_set(1, 1)?;
            writer.begin_result_set(0, 1)?;
            writer.columns(&["key", "value"])?;
            writer.row(&[Value::Text("jane".into()), Value::Integer(401)])?;
            writer.finish()
        });
        let mut client = Client::connect(config(vec![server.url()])).await.expect("connect");
        client
            .put_statement("SELECT * FROM t WHERE key = :key")
            .bind_by_name(":key", "jane")
            .put_statement("UPDATE t SET value = 401 WHERE key = :key")
            .bind_by_name(":key", "jane")
            .put_statement("SELECT * FROM t WHERE key = :key")
            .bind_by_name(":key", "jane");
        let mut rs = client.execute(false).await.expect("execute");

        let row = rs.next_row().expect("row").expect("some");
        let value: Option<i64> = row.get("value").expect("value");
        assert_eq!(value, Some(400));

        assert!(rs.advance_to_next_result_set().expect("next"));
        assert_eq!(rs.lines_changed(), 1);

        assert!(rs.advance_to_next_result_set().expect("next"));
        let row = rs.next_row().expect("row").expect("some");
        let value: Option<i64> = row.get("value").expect("value");
        assert_eq!(value, Some(401));
        assert!(!rs.advance_to_next_result_set().expect("end"));
    }

    #[tokio::test]
    async fn misuse_is_reported_at_execute_and_clears_the_batch() {
        let server = MockServer::start().await;
        let mut client = Client::connect(config(vec![server.url()])).await.expect("connect");

        client.bind_by_name(":x", 1).put_statement("SELECT 1");
        assert!(matches!(client.execute(false).await, Err(ResqlError::Misuse(_))));

        assert!(matches!(client.execute(false).await, Err(ResqlError::Misuse(_))));
        assert!(server.state().requests.is_empty());
        assert_eq!(client.sequence(), 0);

        client.put_statement("SELECT 1");
        client.execute(true).await.expect("clean batch");
        assert_eq!(server.state().requests.len(), 1);
    }

    #[tokio::test]
    async fn prepared_statement_lifecycle() {
        let server = MockServer::start().await;
        let mut client = Client::connect(config(vec![server.url()])).await.expect("connect");
        let stmt = client.prepare("SELECT * FROM t WHERE id = :id").await.expect("prepare");
        assert_eq!(stmt.id(), 1);
        assert_eq!(stmt.sql(), "SELECT * FROM t WHERE id = :id");

        client.put_prepared(&stmt).bind_by_name(":id", 3);
        client.execute(true).await.expect("execute");
        client.delete(stmt).await.expect("delete");

        let state = server.state();
        assert_eq!(
            state.requests[0].tasks,
            vec![Task::Prepare {
                sql: "SELECT * FROM t WHERE id = :id".into()
            }]
        );
        assert!(matches!(
            &state.requests[1].tasks[0],
            Task::Statement {
                source: StatementSource::Prepared(1),
                ..
            }
        ));
        assert_eq!(state.requests[2].tasks, vec![Task::DeletePrepared { id: 1 }]);
        assert_eq!(
            state.requests.iter().filter(|r| !r.readonly).map(|r| r.sequence).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn prepare_inside_a_batch_is_misuse() {
        let server = MockServer::start().await;
        let mut client = Client::connect(config(vec![server.url()])).await.expect("connect");
        client.put_statement("SELECT 1");
        assert!(matches!(client.prepare("SELECT 2").await, Err(ResqlError::Misuse(_))));
        assert!(matches!(client.execute(true).await, Err(ResqlError::Misuse(_))));
        assert!(server.state().requests.is_empty());
    }

    #[tokio::test]
    async fn server_errors_keep_the_connection() {
        let server = MockServer::start().await;
        server.respond_with(|_, out| encode_error_response(out, "no such table: t"));
        let mut client = Client::connect(config(vec![server.url()])).await.expect("connect");
        client.put_statement("SELECT * FROM t");
        match client.execute(true).await {
            Err(ResqlError::ServerReported(msg)) => assert_eq!(msg, "no such table: t"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a server error"),
        }
        assert!(client.is_connected());
        assert_eq!(server.state().connects, 1);
    }

    #[tokio::test]
    async fn cluster_name_mismatch_fails_fast() {
        let server = MockServer::start().await;
        let config = config(vec![server.url()]).with_cluster_name("other");
        let err = Client::connect(config).await.err().expect("mismatch");
        assert!(matches!(err, ResqlError::ClusterNameMismatch));
        assert_eq!(server.state().connects, 1);
    }

    #[tokio::test]
    async fn connect_rotates_past_dead_endpoints() {
        let server = MockServer::start().await;
        let client = Client::connect(config(vec![dead_url().await, server.url()]))
            .await
            .expect("connect");
        assert!(client.is_connected());
        assert_eq!(server.state().connects, 1);
    }

    #[tokio::test]
    async fn unreachable_cluster_surfaces_last_transport_error() {
        let config = config(vec![dead_url().await]).with_timeout(Duration::from_millis(300));
        let err = Client::connect(config).await.err().expect("unreachable");
        assert!(matches!(err, ResqlError::Transport(_)));
    }

    #[tokio::test]
    async fn newer_term_replaces_endpoints_before_rejection() {
        let leader = MockServer::start().await;
        let follower = MockServer::start().await;
        {
            let mut state = follower.state();
            state.connect_code = ResultCode::NotLeader;
            state.term = 2;
            state.nodes = leader.url();
        }
        let client = Client::connect(config(vec![follower.url()])).await.expect("connect");
        assert_eq!(client.term(), 2);
        assert_eq!(
            client.endpoints().iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            vec![leader.url()]
        );
        assert_eq!(follower.state().connects, 1);
        assert_eq!(leader.state().connects, 1);
    }

    #[tokio::test]
    async fn dropped_request_is_resent_with_the_same_sequence() {
        let server = MockServer::start().await;
        let mut client = Client::connect(config(vec![server.url()])).await.expect("connect");
        client.put_statement("INSERT INTO t VALUES(1)");
        client.execute(false).await.expect("first");

        server.state().drop_next_request = true;
        client.put_statement("INSERT INTO t VALUES(2)");
        client.execute(false).await.expect("resent");

        let state = server.state();
        let sequences: Vec<u64> = state.requests.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 2]);
        assert_eq!(state.connects, 2);
        assert_eq!(state.sequence, 2);
    }

    #[tokio::test]
    async fn forgotten_session_is_reported() {
        let server = MockServer::start().await;
        server.state().sequence = 10;
        let mut client = Client::connect(config(vec![server.url()])).await.expect("connect");
        client.put_statement("INSERT INTO t VALUES(1)");
        client.execute(false).await.expect("first");

        {
            let mut state = server.state();
            state.sequence = 3;
            state.drop_next_request = true;
        }
        client.put_statement("INSERT INTO t VALUES(2)");
        match client.execute(false).await {
            Err(ResqlError::SessionLost { server, local }) => assert_eq!((server, local), (3, 12)),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected session loss"),
        }
        assert_eq!(client.sequence(), 3);
        assert!(!client.is_connected());

        client.put_statement("INSERT INTO t VALUES(3)");
        client.execute(false).await.expect("fresh session");
        let state = server.state();
        assert_eq!(state.requests.last().map(|r| r.sequence), Some(4));
        assert_eq!(state.sequence, 4);
        assert_eq!(state.connects, 3);
    }

    #[tokio::test]
    async fn malformed_rows_drop_the_connection_before_the_next_call() {
        let server = MockServer::start().await;
        let mut calls = 0;
        server.respond_with(move |_, out| {
            calls += 1;
            let mut scratch = CursorBuffer::new();
            let mut writer = ResponseWriter::begin(&mut scratch)?;
            writer.begin_result_set(0, 0)?;
            writer.columns(&["n"])?;
            writer.row(&[Value::Integer(calls)])?;
            writer.finish()?;
            let mut bytes = scratch.written().to_vec();
            if calls == 1 {
                // tag of the only column value, ahead of the i64 and three flags
                let tag = bytes.len() - 12;
                bytes[tag] = 42;
            }
            out.write_bytes(&bytes)
        });
        let mut client = Client::connect(config(vec![server.url()])).await.expect("connect");

        client.put_statement("SELECT n FROM t");
        let mut rs = client.execute(true).await.expect("execute");
        assert!(matches!(rs.next_row(), Err(ResqlError::Protocol(_))));
        assert!(matches!(rs.next_row(), Ok(None)));
        drop(rs);
        assert_eq!(server.state().connects, 1);

        client.put_statement("SELECT n FROM t");
        let mut rs = client.execute(true).await.expect("after reconnect");
        let row = rs.next_row().expect("row").expect("some");
        let n: Option<i64> = row.get("n").expect("n");
        assert_eq!(n, Some(2));
        drop(rs);
        assert_eq!(server.state().connects, 2);
    }

    #[tokio::test]
    async fn generated_name_comes_from_the_supplied_rng() {
        let server = MockServer::start().await;
        let mut config = config(vec![server.url()]);
        config.name = None;
        let client = Client::connect_with_rng(config, &mut StdRng::seed_from_u64(7))
            .await
            .expect("connect");
        assert_eq!(client.name(), generate_client_name(&mut StdRng::seed_from_u64(7)));
    }

    #[tokio::test]
    async fn shutdown_says_goodbye() {
        let server = MockServer::start().await;
        let client = Client::connect(config(vec![server.url()])).await.expect("connect");
        client.shutdown().await;
        for _ in 0..100 {
            if server.state().disconnects == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("disconnect request never arrived");
    }
}

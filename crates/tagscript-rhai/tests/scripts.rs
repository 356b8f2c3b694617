//! Scripts driving live sessions through the harness functions.

#[cfg(test)]
mod tests {
    use std::{io::Write, sync::Arc, time::Duration};

    use serde_json::{Value, json};
    use tagscript::{
        FieldList, Harness, HarnessConfig,
        testutils::{Peer, Reply},
    };
    use tagscript_rhai::{HarnessApi, RhaiScriptExecutor, ScriptConfig, ScriptEvalOutcome};
    use tracing_subscriber::fmt;

    struct Fixture {
        harness: Arc<Harness>,
        executor: RhaiScriptExecutor<HarnessApi>,
    }

    impl Fixture {
        fn new() -> Self {
            fmt::try_init().ok();
            let harness = Arc::new(Harness::start(HarnessConfig::default()).expect("harness"));
            let executor = RhaiScriptExecutor::new(
                Arc::new(HarnessApi::new(harness.clone())),
                ScriptConfig::default().with_timeout(Duration::from_secs(30)),
            );
            Self { harness, executor }
        }

        fn run(&self, peer: &Peer, script: &str) -> ScriptEvalOutcome {
            self.executor
                .execute(script, Some(json!({ "uri": peer.uri("proto") })))
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.harness.shutdown();
        }
    }

    const LOGON: &str = r#"
        let s = open(args.uri, "X.Y", [[8, "X.Y"], [49, "CLIENT"]]);
        s.send("A", [[108, "30"]]);
        let reply = s.expect([[35, "A"]]);
        reply[108]
    "#;

    #[test]
    fn logon_script_succeeds() {
        let peer = Peer::logon_acceptor().unwrap();
        let fixture = Fixture::new();
        let outcome = fixture.run(&peer, LOGON);
        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.value, Some(json!("30")));

        let seen = peer.wait_for(1, Duration::from_secs(2));
        assert_eq!(seen[0].get(49), Some("CLIENT"));
        assert_eq!(seen[0].get(108), Some("30"));
    }

    #[test]
    fn missing_field_is_fatal_with_file_and_line() {
        let peer = Peer::spawn(|_| vec![Reply::new("A", FieldList::new())]).unwrap();
        let fixture = Fixture::new();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "let s = open(args.uri, \"X.Y\");\n\
             s.send(\"A\");\n\
             s.expect([[35, \"A\"], [58, \"welcome\"]]);\n\
             print(\"unreachable\");\n"
        )
        .unwrap();

        let outcome = fixture
            .executor
            .execute_file(file.path(), Some(json!({ "uri": peer.uri("tcp") })));
        let error = outcome.error.expect("fault");
        assert_eq!(error.error_type, "missing_field");
        assert!(error.message.contains("58"));
        assert_eq!(
            error.location,
            Some(format!("{}:3", file.path().display()))
        );
        assert!(outcome.logs.is_empty());
    }

    #[test]
    fn mismatch_is_not_swallowed_by_catch() {
        let peer = Peer::spawn(|_| vec![Reply::new("5", FieldList::new())]).unwrap();
        let fixture = Fixture::new();
        let outcome = fixture.run(
            &peer,
            r#"
            let s = open(args.uri, "X.Y");
            s.send("A");
            try {
                s.expect([[35, "A"]]);
            } catch (e) {
                print("caught " + e);
            }
            "done"
            "#,
        );
        let error = outcome.error.expect("fault");
        assert_eq!(error.error_type, "value_mismatch");
        assert_eq!(error.details.unwrap()["kind"], "value_mismatch");
        assert!(outcome.logs.is_empty());
    }

    #[test]
    fn silent_peer_times_out_expectation() {
        let peer = Peer::silent().unwrap();
        let fixture = Fixture::new();
        let outcome = fixture.run(
            &peer,
            r#"
            let s = open(args.uri, "X.Y");
            s.send("A");
            s.expect([[35, "A"]]);
            "#,
        );
        let error = outcome.error.expect("fault");
        assert_eq!(error.error_type, "receive_timeout");
        assert!(error.message.contains("5000ms"));
    }

    #[test]
    fn recv_variants_return_unit_when_empty() {
        let peer = Peer::silent().unwrap();
        let fixture = Fixture::new();
        let outcome = fixture.run(
            &peer,
            r#"
            let s = open(args.uri, "X.Y");
            [type_of(s.try_recv()), type_of(s.recv(2)), s.pending()]
            "#,
        );
        assert_eq!(outcome.value, Some(json!(["()", "()", 0])));
    }

    #[test]
    fn replies_are_read_in_order() {
        let peer = Peer::spawn(|msg| {
            let id = msg.get(11).unwrap_or("?").to_string();
            vec![
                Reply::new("8", FieldList::new().with(11, id.clone()).with(39, "0")),
                Reply::new("8", FieldList::new().with(11, id).with(39, "2")),
            ]
        })
        .unwrap();
        let fixture = Fixture::new();
        let outcome = fixture.run(
            &peer,
            r#"
            let s = open(args.uri, "X.Y");
            let id = new_id();
            s.send("D", #{ "11": id, "55": "IBM", "38": 100 });
            let ack = s.expect(#{ "35": "8", "39": "0" });
            let fill = s.recv();
            [ack[11] == id, fill[39], fill.msg_type]
            "#,
        );
        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.value, Some(json!([true, "2", "8"])));
    }

    #[test]
    fn send_returns_the_written_message() {
        let peer = Peer::silent().unwrap();
        let fixture = Fixture::new();
        let outcome = fixture.run(
            &peer,
            r#"
            let s = open(args.uri, "X.Y", [[49, "CLIENT"]]);
            let first = s.send("A", [[108, 30]]);
            let second = s.send("0");
            print(first);
            [first[34], second[34], first[49], first.raw.starts_with("8=X.Y|9=")]
            "#,
        );
        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.value, Some(json!(["1", "2", "CLIENT", true])));
        assert!(outcome.logs[0].contains("|35=A|34=1|49=CLIENT|108=30|"));
    }

    #[test]
    fn fatal_aborts_with_location() {
        let peer = Peer::silent().unwrap();
        let fixture = Fixture::new();
        let outcome = fixture.run(&peer, "print(\"before\");\nfatal(\"stop here\");\nprint(\"after\");");
        let error = outcome.error.expect("fault");
        assert_eq!(error.error_type, "script_abort");
        assert_eq!(error.message, "stop here");
        assert_eq!(error.location.as_deref(), Some("line 2"));
        assert_eq!(outcome.logs, ["before"]);
    }

    #[test]
    fn session_errors_are_fatal() {
        let peer = Peer::silent().unwrap();
        let fixture = Fixture::new();

        let outcome = fixture.run(&peer, r#"open("localhost", "X.Y")"#);
        assert_eq!(outcome.error.unwrap().error_type, "session");

        let outcome = fixture.run(
            &peer,
            r#"
            let s = open(args.uri, "X.Y");
            s.close();
            s.send("A");
            "#,
        );
        let error = outcome.error.unwrap();
        assert_eq!(error.error_type, "session");
        assert!(error.message.contains("closed"));
    }

    #[test]
    fn malformed_fields_are_fatal() {
        let peer = Peer::silent().unwrap();
        let fixture = Fixture::new();
        let outcome = fixture.run(
            &peer,
            r#"
            let s = open(args.uri, "X.Y");
            s.send("A", [[108]]);
            "#,
        );
        let error = outcome.error.unwrap();
        assert_eq!(error.error_type, "invalid_fields");
        assert_eq!(error.location.as_deref(), Some("line 3"));
        assert!(peer.received().is_empty());
    }

    #[test]
    fn ids_and_sleep_are_available() {
        let peer = Peer::silent().unwrap();
        let fixture = Fixture::new();
        let outcome = fixture.run(
            &peer,
            r#"
            let a = new_id();
            sleep(0.01);
            sleep(0);
            let b = new_id();
            print_fields([[1, a], [2, b]]);
            a != b && a.len() == 14
            "#,
        );
        assert_eq!(outcome.value, Some(Value::Bool(true)));
    }

    #[test]
    fn out_of_range_arguments_are_fatal() {
        let peer = Peer::silent().unwrap();
        let fixture = Fixture::new();

        let outcome = fixture.run(&peer, "sleep(-1.0);\nsleep(1.0e30);\n\"unreachable\"");
        let error = outcome.error.expect("fault");
        assert_eq!(error.error_type, "invalid_argument");
        assert_eq!(error.location.as_deref(), Some("line 2"));

        let outcome = fixture.run(&peer, "let s = open(args.uri, \"X.Y\");\ns.recv(-1)");
        assert_eq!(outcome.error.unwrap().error_type, "invalid_argument");
    }
}

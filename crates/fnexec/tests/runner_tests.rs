mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use fnexec::{RunError, Runner};
use fnexec_protocol::{Codec, RunFunctionRequest, RunFunctionResponse};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::*;

#[tokio::test]
async fn test_returns_function_response_unchanged() {
    let expected = response("hello");
    let runner = fixed_response_runner(&expected);

    let resp = runner
        .execute(&CancellationToken::new(), &observed_request("hello"))
        .await
        .unwrap();
    assert_eq!(resp, expected);
}

#[tokio::test]
async fn test_function_sees_request_on_stdin() {
    // The function copies its input to a file before answering.
    let dir = tempfile::tempdir().unwrap();
    let seen = dir.path().join("stdin.json");
    let runner = sh_runner(
        r#"cat > "$1"; printf '{}'"#,
        &[seen.to_str().unwrap()],
    );

    let req = observed_request("input");
    runner.execute(&CancellationToken::new(), &req).await.unwrap();

    let written = std::fs::read(&seen).unwrap();
    assert_eq!(Codec::Json.decode::<RunFunctionRequest>(&written).unwrap(), req);
    let value: serde_json::Value = serde_json::from_slice(&written).unwrap();
    assert_eq!(value["meta"]["tag"], "input");
    assert_eq!(value["observed"]["composite"]["resource"]["spec"]["replicas"], 3);
}

#[tokio::test]
async fn test_protobuf_pipe_format() {
    let dir = tempfile::tempdir().unwrap();
    let canned = dir.path().join("response.pb");
    let expected = response("binary");
    std::fs::write(&canned, Codec::Protobuf.encode(&expected).unwrap()).unwrap();

    let runner = sh_runner(r#"cat >/dev/null; cat "$1""#, &[canned.to_str().unwrap()])
        .with_codec(Codec::Protobuf);
    let resp = runner
        .execute(&CancellationToken::new(), &request("binary"))
        .await
        .unwrap();
    assert_eq!(resp, expected);
}

#[tokio::test]
async fn test_nonzero_exit_is_execution_failure() {
    // A valid response on stdout does not rescue a failing exit code.
    let encoded = String::from_utf8(Codec::Json.encode(&response("x")).unwrap()).unwrap();
    let runner = sh_runner(
        r#"cat >/dev/null; printf '%s' "$1"; echo 'bad input' >&2; exit 1"#,
        &[&encoded],
    );

    let err = runner
        .execute(&CancellationToken::new(), &request("x"))
        .await
        .unwrap_err();
    match err {
        RunError::Execution { code, stderr, .. } => {
            assert_eq!(code, Some(1));
            assert_eq!(stderr, b"bad input\n");
        }
        other => panic!("expected execution failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_output_is_decode_failure() {
    for output in ["not json", r#"{"results": "nope"}"#, r#"{"meta": {"tag": 5}"#, ""] {
        let runner = sh_runner(r#"cat >/dev/null; printf '%s' "$1""#, &[output]);
        let err = runner
            .execute(&CancellationToken::new(), &request("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Decode(_)), "output {output:?} gave {err:?}");
    }
}

#[tokio::test]
async fn test_missing_executable_is_setup_failure() {
    let runner = Runner::new("/nonexistent/fnexec-function", Vec::new());
    let err = runner
        .execute(&CancellationToken::new(), &request("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Setup { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_large_output_on_both_streams() {
    // 4 MiB of trailing whitespace on stdout and 4 MiB of noise on stderr.
    let expected = response("large");
    let encoded = String::from_utf8(Codec::Json.encode(&expected).unwrap()).unwrap();
    let runner = sh_runner(
        r#"cat >/dev/null
printf '%s' "$1"
head -c 4194304 /dev/zero | tr '\0' ' '
head -c 4194304 /dev/zero >&2"#,
        &[&encoded],
    );

    let resp = tokio::time::timeout(
        Duration::from_secs(30),
        runner.execute(&CancellationToken::new(), &request("large")),
    )
    .await
    .expect("function run deadlocked")
    .unwrap();
    assert_eq!(resp, expected);
}

#[tokio::test]
async fn test_large_request_to_function_that_reads_late() {
    // The function writes output before reading its input.
    let mut req = observed_request("late");
    req.meta.as_mut().unwrap().tag = "x".repeat(2 * 1024 * 1024);
    let runner = sh_runner(
        r#"head -c 1048576 /dev/zero | tr '\0' ' '; cat >/dev/null; printf '{}'"#,
        &[],
    );

    let resp = tokio::time::timeout(
        Duration::from_secs(30),
        runner.execute(&CancellationToken::new(), &req),
    )
    .await
    .expect("function run deadlocked")
    .unwrap();
    assert_eq!(resp, RunFunctionResponse::default());
}

#[tokio::test]
async fn test_cancel_stops_slow_function() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let runner = sh_runner(
        r#"echo $$ > "$1"; exec sleep 60"#,
        &[pid_file.to_str().unwrap()],
    );
    let cancel = CancellationToken::new();
    let req = request("slow");

    let canceller = async {
        let pid = loop {
            if let Ok(text) = tokio::fs::read_to_string(&pid_file).await
                && let Ok(pid) = text.trim().parse::<i32>()
            {
                break pid;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        cancel.cancel();
        (pid, Instant::now())
    };

    let (result, (pid, cancelled_at)) = tokio::time::timeout(Duration::from_secs(20), async {
        tokio::join!(runner.execute(&cancel, &req), canceller)
    })
    .await
    .expect("cancelled run did not return");

    assert!(matches!(result, Err(RunError::Cancelled)), "got {result:?}");
    assert!(cancelled_at.elapsed() < Duration::from_secs(6));
    assert!(!pid_alive(pid), "function {pid} still running after cancel");
}

#[tokio::test]
async fn test_concurrent_runs_keep_their_own_responses() {
    let runner = Arc::new(echo_runner());

    let calls = (0..16).map(|i| {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            let tag = format!("call-{i}");
            let resp = runner
                .execute(&CancellationToken::new(), &request(&tag))
                .await
                .unwrap();
            (tag, resp)
        })
    });

    for joined in futures::future::join_all(calls).await {
        let (tag, resp) = joined.unwrap();
        assert_eq!(response_tag(&resp), tag);
    }
}

#[tokio::test]
async fn test_admission_limit_queues_runs() {
    let runner = Arc::new(
        sh_runner("sleep 0.3; cat", &[]).with_max_concurrent_runs(1),
    );

    let (cancel_a, cancel_b) = (CancellationToken::new(), CancellationToken::new());
    let (req_a, req_b) = (request("a"), request("b"));

    let started = Instant::now();
    let (a, b) = tokio::join!(
        runner.execute(&cancel_a, &req_a),
        runner.execute(&cancel_b, &req_b),
    );
    assert_eq!(response_tag(&a.unwrap()), "a");
    assert_eq!(response_tag(&b.unwrap()), "b");
    assert!(
        started.elapsed() >= Duration::from_millis(600),
        "runs overlapped despite a limit of one"
    );
}

#[tokio::test]
async fn test_unbounded_runs_overlap() {
    let runner = Arc::new(sh_runner("sleep 1; cat", &[]));

    let (cancel_a, cancel_b) = (CancellationToken::new(), CancellationToken::new());
    let (req_a, req_b) = (request("a"), request("b"));

    let started = Instant::now();
    let (a, b) = tokio::join!(
        runner.execute(&cancel_a, &req_a),
        runner.execute(&cancel_b, &req_b),
    );
    a.unwrap();
    b.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1900));
}

#[tokio::test]
async fn test_non_finite_input_is_encode_failure() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let runner = sh_runner(r#"touch "$1"; cat"#, &[marker.to_str().unwrap()]);

    let mut req = request("nan");
    req.input = Some(prost_types::Struct {
        fields: [(
            "weight".to_string(),
            prost_types::Value {
                kind: Some(prost_types::value::Kind::NumberValue(f64::NAN)),
            },
        )]
        .into(),
    });

    let err = runner
        .execute(&CancellationToken::new(), &req)
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Encode(_)), "got {err:?}");
    assert!(!marker.exists(), "function ran with an unencodable request");
}

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;

use fnexec::Runner;
use fnexec_protocol::json::to_struct;
use fnexec_protocol::{
    Codec, FunctionResult, Ready, RequestMeta, Resource, ResponseMeta, RunFunctionRequest,
    RunFunctionResponse, Severity, State,
};
use serde_json::json;

/// Runner for `sh -c SCRIPT sh EXTRA...`, so the script sees EXTRA as `$1...`.
pub fn sh_runner(script: &str, extra: &[&str]) -> Runner {
    let mut args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
    args.extend(extra.iter().map(|s| s.to_string()));
    Runner::new("sh", args)
}

/// Runner whose function ignores its input and always answers `resp`.
pub fn fixed_response_runner(resp: &RunFunctionResponse) -> Runner {
    let encoded = String::from_utf8(Codec::Json.encode(resp).unwrap()).unwrap();
    sh_runner(r#"cat >/dev/null; printf '%s' "$1""#, &[&encoded])
}

/// Runner whose function echoes its input. A JSON request with only `meta`
/// decodes as a response carrying the same tag.
pub fn echo_runner() -> Runner {
    Runner::new("cat", Vec::new())
}

pub fn request(tag: &str) -> RunFunctionRequest {
    RunFunctionRequest {
        meta: Some(RequestMeta {
            tag: tag.to_string(),
        }),
        ..Default::default()
    }
}

pub fn observed_request(tag: &str) -> RunFunctionRequest {
    let composite = Resource {
        resource: Some(to_struct(
            json!({
                "apiVersion": "example.org/v1",
                "kind": "XBucket",
                "metadata": {"name": "bucket"},
                "spec": {"region": "eu-west-1", "replicas": 3}
            })
            .as_object()
            .unwrap()
            .clone(),
        )),
        ..Default::default()
    };
    RunFunctionRequest {
        observed: Some(State {
            composite: Some(composite),
            resources: HashMap::new(),
        }),
        ..request(tag)
    }
}

pub fn response(tag: &str) -> RunFunctionResponse {
    let bucket = Resource {
        resource: Some(to_struct(
            json!({
                "apiVersion": "s3.example.org/v1",
                "kind": "Bucket",
                "spec": {"forProvider": {"region": "eu-west-1"}, "versioned": true}
            })
            .as_object()
            .unwrap()
            .clone(),
        )),
        connection_details: HashMap::from([(
            "password".to_string(),
            b"\x00hunter2\xff".to_vec(),
        )]),
        ready: Ready::True as i32,
    };

    RunFunctionResponse {
        meta: Some(ResponseMeta {
            tag: tag.to_string(),
            ttl: Some(prost_types::Duration {
                seconds: 60,
                nanos: 0,
            }),
        }),
        desired: Some(State {
            composite: None,
            resources: HashMap::from([("bucket".to_string(), bucket)]),
        }),
        results: vec![FunctionResult {
            severity: Severity::Normal as i32,
            message: "created bucket".to_string(),
        }],
        context: Some(to_struct(
            json!({"example.org/attempts": 2}).as_object().unwrap().clone(),
        )),
    }
}

pub fn response_tag(resp: &RunFunctionResponse) -> &str {
    resp.meta.as_ref().map(|m| m.tag.as_str()).unwrap_or_default()
}

pub fn tls_fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/tls")
}

pub fn pid_alive(pid: i32) -> bool {
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(pid, 0) == 0 }
}

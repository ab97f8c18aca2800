#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct Sidecar {
    pub child: Child,
    pub stdin: ChildStdin,
    pub reader: BufReader<ChildStdout>,
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_portald");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("PORTAL_WORKSPACE")
        .spawn()
        .expect("spawn portald");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
    }
}

impl Sidecar {
    /// Send one request and return the whole response envelope.
    pub fn request(&mut self, id: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
        value
    }

    /// Like `request`, but asserts `ok:true` and returns `result`.
    pub fn request_ok(&mut self, id: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(id, method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Asserts `ok:false` and returns the error code.
    pub fn request_err(&mut self, id: &str, method: &str, params: serde_json::Value) -> String {
        let value = self.request(id, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    }

    pub fn select_workspace(&mut self, workspace: &std::path::Path) {
        let _ = self.request_ok(
            "ws",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
    }

    pub fn create_course(&mut self, code: &str, credit: f64, semester: &str) -> String {
        let created = self.request_ok(
            &format!("course-{code}"),
            "courses.create",
            json!({ "code": code, "title": format!("Course {code}"), "credit": credit, "semester": semester }),
        );
        created
            .get("courseId")
            .and_then(|v| v.as_str())
            .expect("courseId")
            .to_string()
    }
}

pub fn count(result: &serde_json::Value, key: &str) -> u64 {
    result.get(key).and_then(|v| v.as_u64()).unwrap_or(u64::MAX)
}

pub fn outcomes(result: &serde_json::Value) -> Vec<String> {
    result
        .get("outcomes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|o| o.get("outcome").and_then(|v| v.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

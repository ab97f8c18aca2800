use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let export = match backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    };
    tracing::info!(path = %out_path, bytes = export.db_bytes, "workspace exported");

    ok(
        &req.id,
        json!({
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "dbSha256": export.db_sha256,
            "dbBytes": export.db_bytes,
        }),
    )
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // Drop open handle before replacing file.
    state.db = None;
    let imported = backup::import_workspace_bundle(&src, &workspace_path);

    let conn = match db::open_db(&workspace_path) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_open_failed", e.to_string(), None),
    };
    state.db = Some(conn);

    match imported {
        Ok(summary) => {
            tracing::info!(path = %in_path, "workspace restored from bundle");
            ok(
                &req.id,
                json!({
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "dbSha256": summary.db_sha256,
                }),
            )
        }
        Err(e) => err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": in_path })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workspace.exportBundle" => Some(handle_export_bundle(state, req)),
        "workspace.importBundle" => Some(handle_import_bundle(state, req)),
        _ => None,
    }
}

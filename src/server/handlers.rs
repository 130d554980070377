//! Route dispatch. Every handler is a plain function of the context and
//! the request body, so the whole API runs without a socket in tests.

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::context::IndexerContext;
use crate::error::{IndexError, Result};
use crate::query::{search_content, search_files, SearchContentRequest, SearchFilesRequest};
use crate::server::protocol::*;
use crate::workspace::Workspace;

/// Routes below `/api/v1`.
pub const ROUTES: &[&str] = &[
    "/server/status",
    "/server/stop",
    "/server/restart",
    "/workspace/create",
    "/workspace/delete",
    "/workspace/list",
    "/workspace/get",
    "/workspace/sync",
    "/workspace/sync-all",
    "/document/update",
    "/document/delete",
    "/search/content",
    "/search/files",
];

/// Run `route` with the JSON `body`. Failures come back as `code: 1`.
pub fn handle(ctx: &IndexerContext, route: &str, body: &[u8]) -> CommonResponse {
    let result = match route {
        "/server/status" => Ok(handle_status(ctx)),
        "/server/stop" => {
            info!("Server stop requested");
            ctx.shutdown.trigger();
            Ok(CommonResponse::message("stopping"))
        }
        "/server/restart" => {
            info!("Server restart requested");
            ctx.shutdown.trigger_restart();
            Ok(CommonResponse::message("restarting"))
        }
        "/workspace/create" => handle_create_workspace(ctx, body),
        "/workspace/delete" => handle_delete_workspace(ctx, body),
        "/workspace/list" => Ok(CommonResponse::with_data(&WorkspaceList {
            workspaces: ctx.registry.list(),
        })),
        "/workspace/get" => handle_get_workspace(ctx, body),
        "/workspace/sync" => handle_sync_workspace(ctx, body),
        "/workspace/sync-all" => ctx
            .indexer
            .request_sync_all()
            .map(|()| CommonResponse::message("Sync in progress...")),
        "/document/update" => handle_update_document(ctx, body),
        "/document/delete" => handle_delete_document(ctx, body),
        "/search/content" => handle_search_content(ctx, body),
        "/search/files" => handle_search_files(ctx, body),
        _ => Err(IndexError::not_found(format!("endpoint {}", route))),
    };
    match result {
        Ok(response) => response,
        Err(e) => {
            warn!(route = %route, error = %e, "Request failed");
            CommonResponse::error(&e)
        }
    }
}

/// Decode `body`; an empty body is the default request.
fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| IndexError::invalid(format!("invalid request body: {}", e)))
}

fn required_path(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(IndexError::invalid(format!("{} is required", what)));
    }
    if !crate::is_absolute_path(value) {
        return Err(IndexError::invalid(format!("{} is not absolute", what)));
    }
    Ok(())
}

/// The registered workspace at `path`.
fn lookup_workspace(ctx: &IndexerContext, path: &str) -> Result<Workspace> {
    required_path(path, "workspace")?;
    ctx.registry.get(path)
}

// ─── Server ──────────────────────────────────────────────────────────

fn handle_status(ctx: &IndexerContext) -> CommonResponse {
    CommonResponse::with_data(&ServerStatus {
        pid: std::process::id(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        shutting_down: ctx.shutdown.is_triggered(),
        restarting: ctx.shutdown.is_restarting(),
    })
}

// ─── Workspaces ──────────────────────────────────────────────────────

fn handle_create_workspace(ctx: &IndexerContext, body: &[u8]) -> Result<CommonResponse> {
    let req: PathRequest = parse_body(body)?;
    required_path(&req.path, "path")?;
    let workspace = ctx.create_workspace(&req.path)?;
    info!(workspace = %workspace.id, path = %workspace.path, "Workspace created");
    Ok(CommonResponse::with_data(&workspace))
}

fn handle_delete_workspace(ctx: &IndexerContext, body: &[u8]) -> Result<CommonResponse> {
    let req: PathRequest = parse_body(body)?;
    required_path(&req.path, "path")?;
    let workspace = ctx.delete_workspace(&req.path)?;
    info!(workspace = %workspace.id, path = %workspace.path, "Workspace deleted");
    Ok(CommonResponse::ok())
}

fn handle_get_workspace(ctx: &IndexerContext, body: &[u8]) -> Result<CommonResponse> {
    let req: PathRequest = parse_body(body)?;
    let workspace = lookup_workspace(ctx, &req.path)?;
    Ok(CommonResponse::with_data(&workspace))
}

fn handle_sync_workspace(ctx: &IndexerContext, body: &[u8]) -> Result<CommonResponse> {
    let req: PathRequest = parse_body(body)?;
    let workspace = lookup_workspace(ctx, &req.path)?;
    ctx.indexer.request_sync(workspace)?;
    Ok(CommonResponse::message("Sync in progress..."))
}

// ─── Documents ───────────────────────────────────────────────────────

fn handle_update_document(ctx: &IndexerContext, body: &[u8]) -> Result<CommonResponse> {
    let req: DocumentRequest = parse_body(body)?;
    required_path(&req.workspace, "workspace")?;
    ctx.indexer.update_document(&req.workspace, &req.path)?;
    info!(workspace = %req.workspace, file = %req.path, "Updated document");
    Ok(CommonResponse::ok())
}

fn handle_delete_document(ctx: &IndexerContext, body: &[u8]) -> Result<CommonResponse> {
    let req: DocumentRequest = parse_body(body)?;
    required_path(&req.workspace, "workspace")?;
    ctx.indexer.delete_document(&req.workspace, &req.path)?;
    info!(workspace = %req.workspace, file = %req.path, "Deleted document");
    Ok(CommonResponse::ok())
}

// ─── Search ──────────────────────────────────────────────────────────

fn handle_search_content(ctx: &IndexerContext, body: &[u8]) -> Result<CommonResponse> {
    let req: SearchContentRequest = parse_body(body)?;
    let workspace = lookup_workspace(ctx, &req.workspace)?;
    let response = search_content(&ctx.store, &workspace, &req, &ctx.config.server.search.limit)?;
    Ok(match &response.error {
        // partial results still go back to the client
        Some(message) => CommonResponse {
            code: 1,
            message: message.clone(),
            ..CommonResponse::with_data(&response)
        },
        None => CommonResponse::with_data(&response),
    })
}

fn handle_search_files(ctx: &IndexerContext, body: &[u8]) -> Result<CommonResponse> {
    let req: SearchFilesRequest = parse_body(body)?;
    let workspace = lookup_workspace(ctx, &req.workspace)?;
    let response = search_files(&ctx.store, &workspace, &req, &ctx.config.server.search.limit)?;
    Ok(CommonResponse::with_data(&response))
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;

//! HTTP trigger for the sync jobs: a token-protected endpoint per job plus a
//! health check, for wiring into external schedulers.

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use serde_json::json;
use tracing::{error, info};

use offersync::pipeline::{self, AppConfig};
use offersync::util::env::{env_opt, env_req};

struct WebhookState {
    run_token: String,
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({"ok": true}))
}

async fn run_job(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<WebhookState>,
) -> HttpResponse {
    let token = req
        .headers()
        .get("X-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if token.is_empty() || token != state.run_token {
        return HttpResponse::Unauthorized().json(json!({"ok": false, "error": "unauthorized"}));
    }

    let job = path.into_inner();
    info!(%job, "webhook run requested");

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %format!("{err:#}"), "configuration error");
            return HttpResponse::InternalServerError()
                .json(json!({"ok": false, "error": format!("{err:#}")}));
        }
    };

    let outcome = match job.as_str() {
        "orders" => pipeline::orders::run(&cfg).await,
        "prices" => pipeline::prices::run(&cfg).await,
        "delivery" => pipeline::delivery::run(&cfg).await,
        other => {
            return HttpResponse::NotFound()
                .json(json!({"ok": false, "error": format!("unknown job {other:?}")}));
        }
    };

    match outcome {
        Ok(outcome) => {
            info!(%job, %outcome, "webhook run finished");
            let mut body = serde_json::to_value(&outcome).unwrap_or_else(|_| json!({}));
            body["ok"] = json!(true);
            HttpResponse::Ok().json(body)
        }
        Err(err) => {
            error!(%job, error = %format!("{err:#}"), "webhook run failed");
            HttpResponse::InternalServerError()
                .json(json!({"ok": false, "error": format!("{err:#}")}))
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    offersync::util::env::init_env();
    offersync::tracing::init_tracing("info,offersync=info")?;

    let run_token = env_req("RUN_TOKEN")?;
    let bind_addr = env_opt("WEBHOOK_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string());
    info!(%bind_addr, "starting webhook server");

    let state = web::Data::new(WebhookState { run_token });
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(health))
            .route("/run/{job}", web::post().to(run_job))
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind to {bind_addr}"))?
    .run()
    .await
    .context("HTTP server error")?;

    Ok(())
}

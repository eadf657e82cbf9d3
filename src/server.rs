use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use anyhow::Context;
use clap::Parser;
use log::info;
use serde_json::json;

use listing_harvester_lib::{logger, Command, Harvest, HarvestConfig, RunController, RunSummary};

/// Runs a harvest in the background and exposes it over HTTP.
#[derive(Parser, Debug)]
#[command(name = "harvest-server", version)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Ignore the progress file and scrape every region again
    #[arg(long)]
    fresh: bool,
}

struct AppState {
    controller: Arc<RunController>,
    output_path: PathBuf,
    summary: Arc<Mutex<Option<RunSummary>>>,
}

#[get("/api/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json("Server is running")
}

#[get("/api/stats")]
async fn get_stats(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.controller.stats().snapshot())
}

#[get("/api/state")]
async fn get_state(data: web::Data<AppState>) -> impl Responder {
    let summary = data.summary.lock().unwrap_or_else(PoisonError::into_inner).clone();
    HttpResponse::Ok().json(json!({
        "control": data.controller.snapshot(),
        "finished": summary.is_some(),
        "summary": summary,
    }))
}

#[post("/api/control/{command}")]
async fn control(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    let token = path.into_inner();
    match Command::parse(&token) {
        Some(command) => {
            let message = data.controller.handle(command).unwrap_or_default();
            HttpResponse::Ok().json(json!({ "command": token, "message": message }))
        }
        None => HttpResponse::BadRequest().json(json!({
            "error": format!("unknown command '{}'", token)
        })),
    }
}

#[get("/api/download")]
async fn download_result(data: web::Data<AppState>) -> impl Responder {
    match std::fs::read_to_string(&data.output_path) {
        Ok(content) => {
            let filename = data
                .output_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "records.csv".to_string());
            HttpResponse::Ok()
                .content_type("text/csv")
                .append_header(("Content-Disposition", format!("attachment; filename=\"{}\"", filename)))
                .body(content)
        }
        Err(_) => HttpResponse::NotFound().body("Record log not written yet."),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = HarvestConfig::load(cli.config.as_deref()).context("loading configuration")?;
    logger::init(config.log_level());

    let harvest = Harvest::prepare(&config, cli.fresh).context("preparing run")?;
    let summary = Arc::new(Mutex::new(None));
    let state = web::Data::new(AppState {
        controller: harvest.controller.clone(),
        output_path: config.output_path.clone(),
        summary: summary.clone(),
    });

    actix_web::rt::spawn(async move {
        let result = harvest.run().await;
        info!("Harvest finished.\n{}", result);
        *summary.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    });

    info!("Starting Web Server at http://{}", cli.bind);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .service(health_check)
            .service(get_stats)
            .service(get_state)
            .service(control)
            .service(download_result)
    })
    .bind(cli.bind.as_str())?
    .run()
    .await?;
    Ok(())
}

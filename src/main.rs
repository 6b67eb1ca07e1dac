use clap::Parser;
use flow_metrics::calculator;
use flow_metrics::cancellation::CancellationToken;
use flow_metrics::cli::{Cli, Command, OutputFormat};
use flow_metrics::config::RunConfig;
use flow_metrics::demo;
use flow_metrics::errors::{ExitCategory, FlowMetricsError};
use flow_metrics::http_client::HttpClient;
use flow_metrics::ingestion::{self, IngestionParams};
use flow_metrics::models::WorkItem;
use flow_metrics::report::{self, ConfigurationSummary, DashboardData, Report, WorkItemSummary};
use flow_metrics::server::{self, AppState};
use flow_metrics::state_config::CalculatorConfig;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let category = ExitCategory::from(&err);
            match category {
                ExitCategory::Cancelled => warn!("run cancelled"),
                _ => error!(error = %err, "run failed"),
            }
            ExitCode::from(category as u8)
        }
    }
}

fn load_calculator_config(config: &RunConfig) -> CalculatorConfig {
    let (calculator_config, warnings) =
        flow_metrics::state_config::load_calculator_config(&config.calculator_config_path);
    for warning in &warnings {
        warn!(message = %warning.message, "configuration warning");
    }
    calculator_config
}

async fn run() -> Result<(), FlowMetricsError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Fetch { days_back, history_limit, progress: _ } => {
            let config = RunConfig::from_env()?;
            let client = HttpClient::new(config.organization_url.clone(), config.pat.clone())?;
            let token = CancellationToken::new();
            let outcome = ingestion::run(
                &client,
                &config.project,
                IngestionParams {
                    lookback_days: days_back,
                    history_limit,
                    concurrency: config.concurrency,
                },
                &token,
                None,
            )
            .await?;
            report::write_work_items(&config.work_items_path(), &outcome.work_items)?;
            info!(items = outcome.work_items.len(), "fetch complete");
            Ok(())
        }

        Command::Calculate { from: _, to: _, format } => {
            let config = RunConfig::from_env()?;
            let items = load_cached_work_items(&config)?;
            let calculator_config = load_calculator_config(&config);
            let now = chrono::Utc::now();
            let bundle = calculator::calculate(&items, &calculator_config, now, None);
            emit_calculate_output(&bundle, format);
            Ok(())
        }

        Command::Sync { days_back, history_limit, progress: _ } => {
            let config = RunConfig::from_env()?;
            let client = HttpClient::new(config.organization_url.clone(), config.pat.clone())?;
            let token = CancellationToken::new();
            let outcome = ingestion::run(
                &client,
                &config.project,
                IngestionParams {
                    lookback_days: days_back,
                    history_limit,
                    concurrency: config.concurrency,
                },
                &token,
                None,
            )
            .await?;

            let calculator_config = load_calculator_config(&config);
            let now = chrono::Utc::now();
            let bundle = calculator::calculate(&outcome.work_items, &calculator_config, now, None);
            let report = Report {
                generated_at: now,
                metrics: bundle.clone(),
                item_count: outcome.work_items.len(),
                validation_errors: outcome.validation_errors,
                partial: outcome.cancelled || outcome.degraded,
                configuration_summary: ConfigurationSummary::from(&calculator_config),
            };
            report::write_work_items(&config.work_items_path(), &outcome.work_items)?;
            report::write_report(&config.report_path(), &report)?;
            report::write_dashboard_data(
                &config.dashboard_data_path(),
                &DashboardData {
                    generated_at: now,
                    metrics: bundle,
                    work_items: outcome
                        .work_items
                        .iter()
                        .map(|item| WorkItemSummary::from_item(item, &calculator_config))
                        .collect(),
                },
            )?;
            info!(items = report.item_count, partial = report.partial, "sync complete");
            Ok(())
        }

        Command::Serve { host, port } => {
            let config = RunConfig::from_env()?;
            let calculator_config = load_calculator_config(&config);
            let state = AppState::new(config, calculator_config);
            server::serve(state, &host, port).await?;
            Ok(())
        }

        Command::Demo { count } => {
            let config = RunConfig::from_env().unwrap_or_else(|_| RunConfig {
                organization_url: String::new(),
                project: String::new(),
                pat: String::new(),
                data_dir: std::path::PathBuf::from("./data"),
                concurrency: 5,
                request_timeout_secs: 30,
                ingestion_timeout_secs: 600,
                calculator_config_path: std::path::PathBuf::from("./data/config.json"),
            });
            let now = chrono::Utc::now();
            let items = demo::generate(count, now);
            report::write_work_items(&config.work_items_path(), &items)?;
            info!(items = items.len(), "demo fixture generated");
            Ok(())
        }
    }
}

fn load_cached_work_items(config: &RunConfig) -> Result<Vec<WorkItem>, FlowMetricsError> {
    let bytes = std::fs::read(config.work_items_path())?;
    serde_json::from_slice(&bytes)
        .map_err(|e| FlowMetricsError::internal(format!("failed to parse cached work_items.json: {e}")))
}

fn emit_calculate_output(bundle: &calculator::MetricsBundle, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(bundle).unwrap_or_default());
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            let _ = writer.write_record(["metric", "value"]);
            let _ = writer.write_record(["lead_time_mean", &bundle.lead_time.mean.map(|v| v.to_string()).unwrap_or_default()]);
            let _ = writer.write_record(["cycle_time_mean", &bundle.cycle_time.mean.map(|v| v.to_string()).unwrap_or_default()]);
            let _ = writer.write_record(["throughput_count", &bundle.throughput.count.to_string()]);
            let _ = writer.write_record(["wip_total", &bundle.wip.total.to_string()]);
            let _ = writer.flush();
        }
    }
}

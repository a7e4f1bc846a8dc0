use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bedstats::bank::Outcome;
use bedstats::dashboard::{self, Dashboard, DashboardContext};
use bedstats::{query, report, DashboardConfig, LiveSession};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_CONFIG: &str = "bedstats.toml";

#[derive(Parser)]
#[command(name = "bedstats")]
#[command(about = "Hospital bed utilisation and patient satisfaction analysis", long_about = None)]
struct Cli {
    /// Configuration file; bedstats.toml is used when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding the CSV files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    InitConfig {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        out: PathBuf,
    },
    /// Beds used per week, summarised by service
    Beds,
    /// One-way ANOVA of beds used by service
    Anova,
    /// Tukey HSD comparison of beds used between services
    Tukey,
    /// Satisfaction vs stay regression on the selected services
    Satisfaction {
        /// Comma separated services, `all` or `none`
        #[arg(long, default_value = "all")]
        services: String,
    },
    /// Predicted stay with 95% confidence interval at one age
    Predict {
        #[arg(long, allow_hyphen_values = true)]
        age: i64,
    },
    /// Patient requests per week and service
    Requests,
    /// Stay vs age model summary and fixed-age predictions
    Summary,
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "all")]
        services: String,
        #[arg(long, default_value_t = dashboard::DEFAULT_AGE, allow_hyphen_values = true)]
        age: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export every dashboard output as JSON
    Export {
        #[arg(long, default_value = "all")]
        services: String,
        #[arg(long, default_value_t = dashboard::DEFAULT_AGE, allow_hyphen_values = true)]
        age: i64,
        #[arg(long, default_value = "dashboard.json")]
        out: PathBuf,
    },
    /// Interactive session reading `age`, `services`, `show` and `quit` from stdin
    Session,
}

#[derive(Serialize)]
struct DashboardExport<'a> {
    context: &'a DashboardContext,
    services: Vec<&'static str>,
    age: i64,
    satisfaction: Option<&'a Outcome<bedstats::SatisfactionView>>,
    age_prediction: Option<&'a Outcome<bedstats::AgePrediction>>,
}

fn load_config(cli: &Cli) -> anyhow::Result<DashboardConfig> {
    let mut config = match &cli.config {
        Some(path) => DashboardConfig::load_from_file(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            DashboardConfig::load_from_file(Path::new(DEFAULT_CONFIG))
                .context("failed to load bedstats.toml")?
        }
        None => DashboardConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn dashboard_for(
    context: Arc<DashboardContext>,
    services: &str,
    age: i64,
) -> anyhow::Result<Dashboard> {
    let mut dash = Dashboard::new(context);
    dash.set_services(query::parse_services(services)?);
    dash.set_age(age);
    dash.refresh();
    Ok(dash)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    if let Commands::InitConfig { out } = &cli.command {
        config.save_to_file(out)?;
        println!("Configuration written to {}.", out.display());
        return Ok(());
    }

    let context = dashboard::load_context(&config).context("failed to load hospital data")?;
    let bank = &context.bank;

    match cli.command {
        Commands::InitConfig { .. } => {}
        Commands::Beds => print!("{}", report::render_beds(&bank.beds_by_service)),
        Commands::Anova => print!("{}", report::render_anova(&bank.anova)),
        Commands::Tukey => print!("{}", report::render_tukey(&bank.tukey)),
        Commands::Satisfaction { services } => {
            let selected = query::parse_services(&services)?;
            let outcome = Outcome::capture("satisfaction", context.satisfaction(&selected));
            print!("{}", report::render_satisfaction(&outcome));
        }
        Commands::Predict { age } => {
            let outcome = Outcome::capture("age prediction", context.age_prediction(age));
            print!("{}", report::render_age_prediction(&outcome));
        }
        Commands::Requests => print!("{}", report::render_requests(&bank.weekly_requests)),
        Commands::Summary => print!("{}", report::render_stay_age(&bank.stay_age)),
        Commands::Report { services, age, out } => {
            let dash = dashboard_for(Arc::clone(&context), &services, age)?;
            let (Some(satisfaction), Some(prediction)) = (dash.satisfaction(), dash.age_prediction())
            else {
                anyhow::bail!("dashboard outputs were not computed");
            };
            let text = report::build_report(&context, satisfaction, prediction);
            std::fs::write(&out, text)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { services, age, out } => {
            let dash = dashboard_for(Arc::clone(&context), &services, age)?;
            let export = DashboardExport {
                context: &context,
                services: dash.services().iter().map(|s| s.as_str()).collect(),
                age: dash.age(),
                satisfaction: dash.satisfaction(),
                age_prediction: dash.age_prediction(),
            };
            std::fs::write(&out, serde_json::to_string_pretty(&export)?)?;
            println!("Dashboard exported to {}.", out.display());
        }
        Commands::Session => run_session(Arc::clone(&context)).await?,
    }

    Ok(())
}

async fn run_session(context: Arc<DashboardContext>) -> anyhow::Result<()> {
    let session = LiveSession::new(context);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Commands: age <0-100> | services <all|none|ICU,surgery,..> | show | quit");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, argument) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "" => continue,
            "age" => match argument.trim().parse::<i64>() {
                Ok(age) => {
                    session.submit_age(age).await?;
                    print_age(&session);
                }
                Err(_) => println!("age must be an integer"),
            },
            "services" => match query::parse_services(argument) {
                Ok(selected) => {
                    session.submit_services(selected).await?;
                    print_satisfaction(&session);
                }
                Err(err) => println!("{err}"),
            },
            "show" => {
                print_age(&session);
                print_satisfaction(&session);
            }
            "quit" | "exit" => break,
            other => println!("unknown command `{other}`"),
        }
    }
    Ok(())
}

fn print_age(session: &LiveSession) {
    match session.snapshot().age_prediction {
        Some(outcome) => print!("{}", report::render_age_prediction(&outcome)),
        None => println!("No age submitted yet."),
    }
}

fn print_satisfaction(session: &LiveSession) {
    match session.snapshot().satisfaction {
        Some(outcome) => print!("{}", report::render_satisfaction(&outcome)),
        None => println!("No services submitted yet."),
    }
}

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{ClientContext, DashboardSettings, Route, RouteDecision};
use storage::Storage;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use config::{load_settings, normalize_database_url, Settings, DEFAULT_CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(name = "dashboard", about = "AWS AI-governance compliance dashboard")]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Overrides `api_url` from the config file and environment.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store an already-issued bearer token.
    Login {
        #[arg(long)]
        token: String,
    },
    /// Exchange email and password for a token.
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Status,
    /// Render a route once, after every widget has settled.
    Show {
        #[arg(long, default_value = "/")]
        route: String,
    },
    /// Keep a route on screen, re-rendering as data arrives.
    Watch {
        #[arg(long, default_value = "/")]
        route: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut settings = load_settings(&args.config)?;
    if let Some(api_url) = args.api_url {
        settings.api_url = api_url;
    }
    if let Some(database_url) = args.database_url {
        settings.database_url = normalize_database_url(&database_url);
    }

    let storage = Storage::new(&settings.database_url)
        .await
        .context("failed to open credential storage")?;
    let context =
        ClientContext::bootstrap(Arc::new(storage), &settings.api_url, settings.request_timeout())
            .await?;

    match args.command {
        Command::Login { token } => {
            context.session.login(token, None).await?;
            match context.api.current_user().await {
                Ok(user) => println!("Signed in as {}", user.display_name()),
                Err(err) if err.requires_reauth() => bail!("token rejected by the api: {err}"),
                Err(err) => {
                    warn!(error = %err, "profile lookup failed; token kept");
                    println!("Token stored");
                }
            }
        }
        Command::SignIn { email, password } => {
            let user = context.api.sign_in(&email, &password).await?;
            println!("Signed in as {}", user.display_name());
        }
        Command::Logout => {
            context.sign_out().await;
            println!("Signed out");
        }
        Command::Status => print_status(&context).await,
        Command::Show { route } => show(&context, Route::from_path(&route), &settings).await?,
        Command::Watch { route } => watch(&context, Route::from_path(&route), &settings).await?,
    }

    Ok(())
}

/// Logs go to stderr so they never interleave with the rendered dashboard.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .with_writer(std::io::stderr)
        .init();
}

/// `RUST_LOG` when it is set and parses, `info` otherwise.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

async fn print_status(context: &ClientContext) {
    if !context.session.is_authenticated() {
        println!("Signed out");
        return;
    }
    match context.api.current_user().await {
        Ok(user) => println!("Signed in as {} <{}>", user.display_name(), user.email),
        Err(err) if err.requires_reauth() => println!("Signed out (stored token was rejected)"),
        Err(err) => println!("Signed in (profile unavailable: {err})"),
    }
}

async fn show(context: &ClientContext, route: Route, settings: &Settings) -> Result<()> {
    match context.navigator(route).decision() {
        RouteDecision::Redirect { from, .. } => {
            print!("{}", render::render_login_required(from));
            Ok(())
        }
        RouteDecision::Render(Route::Dashboard) => {
            let mut mount = context.mount_dashboard(one_shot(settings.dashboard()));
            let wait = settings.request_timeout() * 4;
            let view = match tokio::time::timeout(wait, mount.settled()).await {
                Ok(Some(view)) => view,
                Ok(None) => bail!("dashboard stopped before it settled"),
                Err(_) => {
                    warn!(?wait, "dashboard: not every widget settled; rendering what arrived");
                    mount.view()
                }
            };
            print!("{}", render::render_dashboard(&view));
            if !context.session.is_authenticated() {
                print!("{}", render::render_login_required(route));
            }
            Ok(())
        }
        RouteDecision::Render(other) => {
            print!("{}", render::render_unavailable(other));
            Ok(())
        }
    }
}

/// A single render has nothing to refresh.
fn one_shot(settings: DashboardSettings) -> DashboardSettings {
    DashboardSettings {
        overview_refetch_interval: None,
        ..settings
    }
}

async fn watch(context: &ClientContext, route: Route, settings: &Settings) -> Result<()> {
    let mut navigator = context.navigator(route);

    loop {
        match navigator.decision() {
            RouteDecision::Redirect { from, .. } => {
                context.queries.clear();
                print!("{}", render::render_login_required(from));
                return Ok(());
            }
            RouteDecision::Render(Route::Dashboard) => {}
            RouteDecision::Render(other) => {
                print!("{}", render::render_unavailable(other));
                return Ok(());
            }
        }

        let mut mount = context.mount_dashboard(settings.dashboard());
        print!("{}", render::render_dashboard(&mount.view()));

        // Runs until the session change forces a new routing decision.
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("dashboard: interrupted");
                    return Ok(());
                }
                decision = navigator.session_changed() => match decision {
                    Some(RouteDecision::Render(_)) => {}
                    Some(RouteDecision::Redirect { .. }) => break,
                    None => bail!("session store closed"),
                },
                view = mount.next_view() => {
                    let view = view.context("dashboard update task stopped")?;
                    print!("\x1b[2J\x1b[H{}", render::render_dashboard(&view));
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

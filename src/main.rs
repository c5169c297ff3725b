use std::sync::Arc;

use clap::{Parser, Subcommand};
use neo_session::notify::{Level, RecordingNotifier};
use neo_session::{AppError, NeoApp, NeoConfig, dashboard};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    App(#[from] AppError),
    #[error("api request failed: {0}")]
    Api(#[from] neo_session::ApiError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("missing password; pass --password or set NEO_PASSWORD")]
    MissingPassword,
    #[error("{0}")]
    Failed(String),
}

#[derive(Parser, Debug)]
#[command(name = "neo", about = "Sign in to neo and call its API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with a username and password.
    Login {
        username: String,
        #[arg(long, env = "NEO_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Start Google sign-in through the identity provider.
    SignIn,
    /// Sign out locally and with the identity provider.
    SignOut,
    /// Show who is signed in.
    Whoami,
    /// Fetch the signed-in user's profile from the API.
    Profile,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = NeoConfig::from_env().map_err(AppError::from)?;
    let notifier = Arc::new(RecordingNotifier::new());
    let app = NeoApp::from_config(config, notifier.clone())?;
    app.start().await;

    let result = run(&app, cli.command).await;
    let failed = print_notifications(&notifier);
    result?;
    if failed {
        return Err(CliError::Failed("operation failed".into()));
    }
    Ok(())
}

async fn run(app: &NeoApp, command: Command) -> Result<(), CliError> {
    match command {
        Command::Login { username, password } => {
            let password = password.ok_or(CliError::MissingPassword)?;
            app.controller.login_with_credentials(&username, &password).await;
            print_greeting(app);
        }
        Command::SignIn => {
            app.controller.sign_in_with_identity_provider().await;
            print_greeting(app);
        }
        Command::SignOut => app.controller.sign_out().await,
        Command::Whoami => print_greeting(app),
        Command::Profile => {
            let profile = app.api.fetch_user_profile().await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
    }
    Ok(())
}

fn print_greeting(app: &NeoApp) {
    let session = app.controller.state();
    if session.user.is_some() {
        println!("{}", dashboard::greeting(&session));
    } else {
        println!("not signed in");
    }
}

/// Print queued notifications; true if any was an error.
fn print_notifications(notifier: &RecordingNotifier) -> bool {
    let mut failed = false;
    for note in notifier.drain() {
        match note.level {
            Level::Success => println!("{}", note.message),
            Level::Error => {
                eprintln!("{}", note.message);
                failed = true;
            }
        }
    }
    failed
}

//! ShadowVault command-line client.
//!
//! Every invocation restores the persisted session, runs one command and
//! exits. Protected commands go through the route guard exactly like the
//! vault screen would.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use shadowvault_app_lib::account::CONFIRM_LABEL;
use shadowvault_app_lib::backend::RestBackend;
use shadowvault_app_lib::commands;
use shadowvault_app_lib::routing::Surface;
use shadowvault_app_lib::secrets::{ListSnapshot, SecretId};
use shadowvault_app_lib::session::{FileSessionStorage, SignUpOutcome};
use shadowvault_app_lib::storage::{load_settings, save_settings, DataDir};
use shadowvault_app_lib::AppState;

/// ShadowVault: a personal secrets vault
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Data directory for settings and the saved session
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account. A verification email is sent; sign in afterwards.
    SignUp {
        #[arg(long)]
        email: String,
    },
    /// Sign in and remember the session
    SignIn {
        #[arg(long)]
        email: String,
    },
    /// Sign out and forget the session
    SignOut,
    /// Show who is signed in and the vault state
    Status,
    /// List stored secrets, newest first
    List,
    /// Store a new secret
    Add {
        #[arg(long)]
        title: String,
        /// Secret value. Prompted for (hidden) when omitted.
        #[arg(long)]
        value: Option<String>,
    },
    /// Delete a secret by id
    Delete { id: SecretId },
    /// Permanently delete the account and every secret in it
    DeleteAccount,
    /// Save backend settings to the data directory
    Configure {
        #[arg(long)]
        backend_url: Option<String>,
        #[arg(long)]
        anon_key: Option<String>,
        /// Link target of the verification email
        #[arg(long)]
        email_redirect_to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    shadowvault_app_lib::init_tracing();

    let args = Args::parse();

    let data_dir = match args.data_dir {
        Some(path) => DataDir::new(path)?,
        None => DataDir::platform_default()?,
    };
    debug!("Using data directory {:?}", data_dir.path());

    let command = match args.command {
        Command::Configure {
            backend_url,
            anon_key,
            email_redirect_to,
        } => return configure(&data_dir, backend_url, anon_key, email_redirect_to),
        other => other,
    };

    let settings = load_settings(&data_dir)?;
    let backend = RestBackend::new(&settings).context("Invalid backend configuration")?;
    let storage = FileSessionStorage::new(&data_dir);

    let state = AppState::new(Arc::new(backend), Arc::new(storage), settings);
    state.start().await;

    let outcome = run(&state, command).await;
    state.shutdown();
    outcome
}

async fn run(state: &AppState, command: Command) -> Result<()> {
    match command {
        Command::SignUp { email } => {
            let password = prompt_hidden("Password: ")?;
            let SignUpOutcome::VerificationPending { email } =
                commands::sign_up(state, &email, &password).await?;
            println!("Account created. Check {} to verify it, then sign in.", email);
        }
        Command::SignIn { email } => {
            let password = prompt_hidden("Password: ")?;
            let identity = commands::sign_in(state, &email, &password).await?;
            println!(
                "Signed in as {}",
                identity.email.as_deref().unwrap_or(&identity.id)
            );
        }
        Command::SignOut => {
            commands::sign_out(state).await;
            println!("Signed out.");
        }
        Command::Status => {
            let status = commands::get_status(state);
            match status.identity {
                Some(identity) => println!(
                    "Signed in as {}",
                    identity.email.as_deref().unwrap_or(&identity.id)
                ),
                None => println!("Not signed in"),
            }
            println!("Route: {}", status.route);
        }
        Command::List => {
            require_vault(state)?;
            let snapshot = commands::refresh_secrets(state).await?;
            print_list(&snapshot);
        }
        Command::Add { title, value } => {
            require_vault(state)?;
            let value = match value {
                Some(v) => v,
                None => prompt_hidden("Secret value: ")?,
            };
            commands::add_secret(state, &title, &value).await?;
            let snapshot = commands::get_secrets(state);
            println!("Stored. [{}]", snapshot.status());
        }
        Command::Delete { id } => {
            require_vault(state)?;
            commands::delete_secret(state, id).await?;
            println!("Deleted secret {}.", id);
        }
        Command::Configure { .. } => bail!("configure does not need a session"),
        Command::DeleteAccount => {
            require_vault(state)?;
            let request = commands::request_account_deletion(state)?;
            println!("{}", request.warning);
            let answer = prompt_line(&format!("Type {} to confirm: ", CONFIRM_LABEL))?;
            if answer.trim() == request.confirm_label {
                commands::confirm_account_deletion(state, request.request_id).await?;
                println!("Account deleted.");
            } else {
                commands::cancel_account_deletion(state, request.request_id);
                println!("Cancelled. Nothing was deleted.");
            }
        }
    }
    Ok(())
}

fn configure(
    data_dir: &DataDir,
    backend_url: Option<String>,
    anon_key: Option<String>,
    email_redirect_to: Option<String>,
) -> Result<()> {
    let mut settings = load_settings(data_dir)?;
    if let Some(url) = backend_url {
        settings.backend_url = url;
    }
    if let Some(key) = anon_key {
        settings.anon_key = key;
    }
    if email_redirect_to.is_some() {
        settings.email_redirect_to = email_redirect_to;
    }
    settings.validate()?;
    save_settings(data_dir, &settings)?;
    info!("Settings saved to {:?}", data_dir.path());
    println!("Settings saved.");
    Ok(())
}

/// Protected commands run only where the guard lets the vault screen open.
fn require_vault(state: &AppState) -> Result<()> {
    if commands::navigate(state, Surface::Vault) != Surface::Vault {
        bail!("Not signed in. Run `shadowvault sign-in --email <EMAIL>` first.");
    }
    Ok(())
}

fn print_list(snapshot: &ListSnapshot) {
    if snapshot.secrets.is_empty() {
        println!("No secrets stored. [{}]", snapshot.status());
        return;
    }
    for secret in &snapshot.secrets {
        println!("{:>6}  {}  {}", secret.id, secret.title, secret.value);
    }
    info!("{} secrets", snapshot.secrets.len());
}

fn prompt_hidden(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt).context("Failed to read from terminal")
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

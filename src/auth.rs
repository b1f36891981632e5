use std::fs;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use dialoguer::{Input, Password};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::args::BaseArgs;
use crate::codex::error::PreconditionError;
use crate::graphql::GraphQlClient;
use crate::http::ApiClient;
use crate::ui::{print_command_status, with_spinner, CommandStatus};

const AUTH_DIR: &str = ".pathbird";
const AUTH_FILE: &str = "auth.json";
const AUTH_COOKIE: &str = "auth_token";
const LOGIN_ROUTE: &str = "auth/login";

#[derive(Debug, Clone, Args)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthSubcommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum AuthSubcommand {
    /// Log in to Pathbird with your email and password
    Login(LoginArgs),
    /// Show whether you are logged in and until when
    Status,
    /// Log out (remove the stored credential)
    Logout,
}

#[derive(Debug, Clone, Args)]
pub struct LoginArgs {
    /// Account email (prompted for when omitted)
    #[arg(long)]
    pub email: Option<String>,
}

/// Bearer token for the Pathbird API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "apiToken")]
    pub token: String,
    #[serde(rename = "expirationTime")]
    pub expiration: DateTime<Utc>,
}

impl Credential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

/// On-disk location of the persisted [`Credential`].
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.pathbird/auth.json`
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
        Ok(Self::at(home.join(AUTH_DIR).join(AUTH_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored credential if there is one that has not expired.
    /// An expired credential is removed.
    pub fn current(&self) -> Result<Option<Credential>> {
        self.current_at(Utc::now())
    }

    fn current_at(&self, now: DateTime<Utc>) -> Result<Option<Credential>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        let credential: Credential = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;

        if credential.is_expired_at(now) {
            debug!(expiration = %credential.expiration, "stored credential has expired");
            if let Err(err) = fs::remove_file(&self.path) {
                warn!("failed to remove expired credential {}: {err}", self.path.display());
            }
            return Ok(None);
        }
        Ok(Some(credential))
    }

    pub fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            create_private_dir(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = open_private_file(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            serde_json::to_writer_pretty(&mut file, credential)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Removes the stored credential. Returns whether there was one.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", self.path.display())),
        }
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
fn open_private_file(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private_file(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}

/// Loads the current credential or fails with a login hint.
pub fn require_credential(base: &BaseArgs) -> Result<Credential> {
    let store = base.credential_store()?;
    match store.current()? {
        Some(credential) => Ok(credential),
        None => Err(PreconditionError::NotAuthenticated.into()),
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginToken {
    #[serde(default)]
    user_id: Option<String>,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: LoginToken,
}

/// Exchanges email and password for an API token. The token itself comes back
/// as the `auth_token` cookie; the JSON body carries its expiration.
pub async fn authenticate_with_password(
    client: &ApiClient,
    email: &str,
    password: &str,
) -> Result<Credential> {
    let response = client
        .post_json(LOGIN_ROUTE, &LoginRequest { email, password })
        .await?;

    if !response.is_success() {
        let body = response.error_body()?;
        bail!("authentication failed: {} ({})", body.error, body.message);
    }

    let payload: LoginResponse = response
        .json()
        .context("failed to parse authentication response")?;
    debug!(user_id = ?payload.token.user_id, "authenticated");

    let expiration = DateTime::parse_from_rfc3339(&payload.token.expires_at)
        .context("failed to parse token expiration time")?
        .with_timezone(&Utc);
    let token = response
        .cookie(AUTH_COOKIE)
        .ok_or_else(|| anyhow!("api login returned success, but didn't include a token cookie"))?;

    Ok(Credential {
        token: token.to_string(),
        expiration,
    })
}

pub async fn run(base: BaseArgs, args: AuthArgs) -> Result<()> {
    match args.command {
        AuthSubcommand::Login(args) => run_login(&base, args).await,
        AuthSubcommand::Status => run_status(&base).await,
        AuthSubcommand::Logout => run_logout(&base),
    }
}

async fn run_login(base: &BaseArgs, args: LoginArgs) -> Result<()> {
    if !std::io::stdin().is_terminal() {
        bail!("login requires an interactive terminal");
    }

    let email = match args.email {
        Some(email) => email,
        None => Input::<String>::new()
            .with_prompt("Email")
            .interact_text()?,
    };
    let password = Password::new().with_prompt("Password").interact()?;

    let client = ApiClient::new(&base.api_host, None)?;
    let credential = with_spinner(
        "Logging in...",
        authenticate_with_password(&client, email.trim(), &password),
    )
    .await?;

    let store = base.credential_store()?;
    store.save(&credential)?;
    debug!(path = %store.path().display(), "saved credential");

    print_command_status(
        CommandStatus::Success,
        &format!("Logged in as {} (until {})", email.trim(), credential.expiration.to_rfc2822()),
    );
    Ok(())
}

async fn run_status(base: &BaseArgs) -> Result<()> {
    let credential = require_credential(base)?;
    print_command_status(
        CommandStatus::Success,
        &format!("Authenticated (until {})", credential.expiration.to_rfc2822()),
    );

    let graphql = GraphQlClient::new(&base.api_host, Some(credential))?;
    match graphql.viewer().await {
        Ok(user) => {
            debug!(user_id = %user.id, "resolved current user");
            println!("Logged in as {} <{}>", user.name, user.email);
        }
        Err(err) => debug!("failed to look up current user: {err}"),
    }
    Ok(())
}

fn run_logout(base: &BaseArgs) -> Result<()> {
    let store = base.credential_store()?;
    if store.clear()? {
        print_command_status(CommandStatus::Success, "Logged out");
    } else {
        print_command_status(CommandStatus::Warning, "Not logged in");
    }
    Ok(())
}

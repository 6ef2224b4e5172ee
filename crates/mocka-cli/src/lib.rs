use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use mocka_api_client::{
    ClientConfig, LoginRequest, MockRequest, MockaClient, RegisterRequest, RequestError,
    mock_sample_url,
};
use mocka_client_core::{
    FilePersistence, GLOBAL_FIELD_KEY, LifetimeError, LifetimeUnit, LoginRedirect, MockLifetime,
    SessionContext, TokenStore, format_expiry, normalize_base_url, resolve_api_base_url,
    resolve_token_file_path,
};
use tracing_subscriber::EnvFilter;

const BASE_URL_SOURCE_FLAG: &str = "--api-base";
const SPEC_FILE_EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

#[derive(Parser, Debug)]
#[command(name = "mocka")]
#[command(about = "Turn API specs into hosted mock endpoints")]
pub struct MockaCli {
    /// API base url. Falls back to MOCKA_API_BASE_URL, then VITE_API_BASE_URL.
    #[arg(long, global = true)]
    pub api_base: Option<String>,
    /// Session file. Falls back to MOCKA_TOKEN_FILE, then the user data dir.
    #[arg(long, global = true)]
    pub token_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in and store the session locally
    Login(LoginArgs),
    /// Create an account and sign in
    Register(RegisterArgs),
    /// Forget the stored session
    Logout,
    /// Show the configured API and who is signed in
    Status,
    /// Upload a JSON or YAML spec and generate a mock endpoint for it
    Upload(UploadArgs),
}

impl Commands {
    /// Logout discards the tokens, so refreshing them first is wasted work.
    #[must_use]
    pub fn checks_session_at_startup(&self) -> bool {
        !matches!(self, Self::Logout)
    }
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    #[arg(long)]
    pub username: String,
    #[arg(long)]
    pub password: String,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[arg(long)]
    pub username: String,
    #[arg(long)]
    pub password: String,
    #[arg(long)]
    pub first_name: Option<String>,
    #[arg(long)]
    pub last_name: Option<String>,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    pub file: PathBuf,
    #[command(flatten)]
    pub lifetime: LifetimeArgs,
}

/// Mutually exclusive lifetime flags; none given means one day.
#[derive(Args, Debug, Default)]
#[group(multiple = false)]
pub struct LifetimeArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub hours: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    pub days: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    pub weeks: Option<i64>,
}

impl LifetimeArgs {
    pub fn to_lifetime(&self) -> Result<MockLifetime, LifetimeError> {
        match (self.hours, self.days, self.weeks) {
            (Some(value), _, _) => MockLifetime::new(LifetimeUnit::Hours, value),
            (_, Some(value), _) => MockLifetime::new(LifetimeUnit::Days, value),
            (_, _, Some(value)) => MockLifetime::new(LifetimeUnit::Weeks, value),
            _ => Ok(MockLifetime::default()),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpecFileError {
    #[error("Invalid file type: please upload a JSON or YAML file ({file})")]
    UnsupportedExtension { file: String },
}

/// Accepts `.json`, `.yaml` and `.yml`, case-insensitively.
pub fn validate_spec_file(path: &Path) -> Result<(), SpecFileError> {
    let supported = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            SPEC_FILE_EXTENSIONS
                .iter()
                .any(|allowed| extension.eq_ignore_ascii_case(allowed))
        });
    if supported {
        Ok(())
    } else {
        Err(SpecFileError::UnsupportedExtension {
            file: path.display().to_string(),
        })
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Remembers where logout wanted to send the user.
#[derive(Debug, Default)]
struct LoginHint {
    path: Mutex<Option<String>>,
}

impl LoginRedirect for LoginHint {
    fn redirect_to_login(&self, path: &str) {
        if let Ok(mut slot) = self.path.lock() {
            *slot = Some(path.to_string());
        }
    }
}

pub struct CliContext {
    pub client: MockaClient,
    pub session: SessionContext,
    pub base_url_source: &'static str,
}

/// Opens the stored session and, unless the command opts out, runs the
/// startup refresh check.
pub async fn connect(cli: &MockaCli) -> Result<CliContext> {
    let (base_url, base_url_source) = match cli.api_base.as_deref() {
        Some(raw) => (normalize_base_url(raw)?, BASE_URL_SOURCE_FLAG),
        None => resolve_api_base_url()?,
    };
    let token_file = cli
        .token_file
        .clone()
        .unwrap_or_else(resolve_token_file_path);
    let store = TokenStore::open(FilePersistence::new(&token_file))
        .with_context(|| format!("failed to open session file {}", token_file.display()))?;
    let store = Arc::new(store);

    let client = MockaClient::new(ClientConfig::new(base_url), Arc::clone(&store))?;
    let session = SessionContext::new(store);
    if cli.command.checks_session_at_startup() {
        let outcome = session.initialize(client.refresher()).await;
        tracing::debug!(
            outcome = ?outcome,
            base_url = %client.base_url(),
            source = base_url_source,
            "Session initialized"
        );
    }

    Ok(CliContext {
        client,
        session,
        base_url_source,
    })
}

/// Runs one command and returns the lines to show the user.
pub async fn run(cli: MockaCli) -> Result<Vec<String>> {
    if let Commands::Upload(args) = &cli.command {
        validate_spec_file(&args.file)?;
        args.lifetime.to_lifetime()?;
    }
    let context = connect(&cli).await?;
    match cli.command {
        Commands::Login(args) => login(&context, args).await,
        Commands::Register(args) => register(&context, args).await,
        Commands::Logout => logout(&context),
        Commands::Status => Ok(status(&context)),
        Commands::Upload(args) => upload(&context, args).await,
    }
}

async fn login(context: &CliContext, args: LoginArgs) -> Result<Vec<String>> {
    context
        .client
        .sign_in(&LoginRequest {
            username: Some(args.username),
            password: Some(args.password),
        })
        .await?;
    let full_name = context.session.full_name();
    Ok(vec![greeting("Login successful.", full_name.as_deref())])
}

async fn register(context: &CliContext, args: RegisterArgs) -> Result<Vec<String>> {
    context
        .client
        .sign_up(&RegisterRequest {
            first_name: args.first_name,
            last_name: args.last_name,
            username: Some(args.username),
            password: Some(args.password),
        })
        .await?;
    let full_name = context.session.full_name();
    Ok(vec![greeting("Account created.", full_name.as_deref())])
}

fn greeting(prefix: &str, full_name: Option<&str>) -> String {
    match full_name {
        Some(name) => format!("{prefix} Welcome, {name}."),
        None => format!("{prefix} Welcome to Mocka."),
    }
}

fn logout(context: &CliContext) -> Result<Vec<String>> {
    let hint = LoginHint::default();
    context.session.logout(&hint)?;
    let path = hint
        .path
        .lock()
        .ok()
        .and_then(|slot| slot.clone())
        .unwrap_or_default();
    tracing::debug!(path = %path, "Logged out");
    Ok(vec![
        "Signed out.".to_string(),
        "Run `mocka login` to sign in again.".to_string(),
    ])
}

fn status(context: &CliContext) -> Vec<String> {
    let state = context.session.state();
    let who = match (state.is_authenticated, state.full_name) {
        (true, Some(name)) => format!("Signed in as {name}"),
        (true, None) => "Signed in".to_string(),
        (false, _) => "Not signed in".to_string(),
    };
    vec![
        format!(
            "API: {} (from {})",
            context.client.base_url(),
            context.base_url_source
        ),
        who,
    ]
}

async fn upload(context: &CliContext, args: UploadArgs) -> Result<Vec<String>> {
    if !context.session.is_authenticated() {
        bail!("Not signed in. Run `mocka login` first.");
    }
    let lifetime = args.lifetime.to_lifetime()?;
    let file_name = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("invalid file name {}", args.file.display()))?;
    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let uploaded = context.client.upload_doc(&file_name, bytes).await?;
    let Some(doc_id) = uploaded.doc_id else {
        bail!("Upload succeeded but the response carried no document id");
    };
    let generated = context
        .client
        .generate_mock(&MockRequest { doc_id, lifetime })
        .await?;
    let Some(token) = generated.token.as_deref() else {
        bail!("Mock generation succeeded but the response carried no token");
    };

    let mut lines = vec![
        format!("Uploaded {file_name}."),
        format!("Mock endpoint: {}", context.client.mock_url(token)),
        format!(
            "Try it: {}",
            mock_sample_url(context.client.base_url(), token)
        ),
        format!("Lifetime: {} {}", lifetime.value(), lifetime.unit()),
    ];
    if let Some(expiry) = generated
        .expiry()
        .and_then(|raw| format_expiry(raw, &chrono::Local))
    {
        lines.push(format!("Expires: {expiry}"));
    }
    Ok(lines)
}

/// Lines describing a failed command. Validation failures list every message
/// and the field each one belongs to.
pub fn render_error(error: &anyhow::Error) -> Vec<String> {
    let Some(api_error) = error
        .downcast_ref::<RequestError>()
        .and_then(RequestError::api_error)
    else {
        return vec![format!("error: {error:#}")];
    };

    if !api_error.is_validation_failure() {
        return vec![format!("error: {}", api_error.message)];
    }

    let mut lines = vec!["Validation errors:".to_string()];
    match api_error.validation_messages() {
        Some(messages) => lines.extend(messages.into_iter().map(|message| format!("  {message}"))),
        None => lines.push(format!("  {}", api_error.message)),
    }
    let fields = api_error.field_errors();
    let hints: Vec<String> = fields
        .iter()
        .filter(|(field, _)| *field != GLOBAL_FIELD_KEY)
        .flat_map(|(field, messages)| {
            messages
                .iter()
                .map(move |message| format!("  --{field}: {message}"))
        })
        .collect();
    if !hints.is_empty() {
        lines.push("Check these fields:".to_string());
        lines.extend(hints);
    }
    lines
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::routing::post;
    use axum::{Json, Router};
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use clap::Parser;
    use clap::error::ErrorKind;
    use mocka_client_core::{ApiError, RefreshTokenUpdate};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    #[test]
    fn cli_requires_subcommand() {
        let err = match MockaCli::try_parse_from(["mocka"]) {
            Ok(_) => panic!("expected missing subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn cli_rejects_unknown_subcommand() {
        let err = match MockaCli::try_parse_from(["mocka", "unknown-subcommand"]) {
            Ok(_) => panic!("expected invalid subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn lifetime_flags_are_mutually_exclusive() {
        let err = match MockaCli::try_parse_from([
            "mocka", "upload", "api.json", "--hours", "2", "--days", "1",
        ]) {
            Ok(_) => panic!("expected conflicting lifetime flags"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn lifetime_defaults_to_one_day() {
        let cli = MockaCli::try_parse_from(["mocka", "upload", "api.yaml"]).expect("parse");
        let Commands::Upload(args) = cli.command else {
            panic!("expected upload command");
        };
        assert_eq!(
            args.lifetime.to_lifetime().expect("lifetime"),
            MockLifetime::default()
        );
    }

    #[test]
    fn lifetime_flags_enforce_unit_maximum() {
        let args = LifetimeArgs {
            weeks: Some(5),
            ..LifetimeArgs::default()
        };
        assert_eq!(
            args.to_lifetime().map_err(|error| error.to_string()),
            Err("Maximum 4 weeks allowed".to_string())
        );
        let args = LifetimeArgs {
            hours: Some(0),
            ..LifetimeArgs::default()
        };
        assert_eq!(args.to_lifetime(), Err(LifetimeError::InvalidNumber));
    }

    #[test]
    fn spec_files_must_be_json_or_yaml() {
        assert!(validate_spec_file(Path::new("petstore.JSON")).is_ok());
        assert!(validate_spec_file(Path::new("dir/api.yml")).is_ok());
        assert!(validate_spec_file(Path::new("api.yaml")).is_ok());
        assert!(validate_spec_file(Path::new("notes.txt")).is_err());
        assert!(validate_spec_file(Path::new("json")).is_err());
    }

    #[test]
    fn validation_errors_render_messages_and_field_hints() {
        let error = anyhow::Error::from(RequestError::Api(ApiError::new(
            422,
            "Validation failed",
            Some(json!({
                "message": "Validation failed",
                "details": ["Username: already taken", "Something else broke"]
            })),
        )));
        assert_eq!(
            render_error(&error),
            vec![
                "Validation errors:",
                "  Validation failed",
                "  Username: already taken",
                "  Something else broke",
                "Check these fields:",
                "  --username: already taken",
            ]
        );
    }

    #[test]
    fn other_api_errors_render_their_message() {
        let error = anyhow::Error::from(RequestError::Api(ApiError::new(
            401,
            "Invalid credentials",
            None,
        )));
        assert_eq!(render_error(&error), vec!["error: Invalid credentials"]);
        let error = anyhow::anyhow!("disk full");
        assert_eq!(render_error(&error), vec!["error: disk full"]);
    }

    #[tokio::test]
    async fn upload_rejects_unsupported_file_before_any_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cli = MockaCli::try_parse_from([
            "mocka",
            "--api-base",
            "http://127.0.0.1:9",
            "--token-file",
            dir.path().join("session.json").to_str().expect("utf8 path"),
            "upload",
            "notes.txt",
        ])
        .expect("parse");
        let error = run(cli).await.expect_err("unsupported extension");
        assert!(error.downcast_ref::<SpecFileError>().is_some());
    }

    #[tokio::test]
    async fn login_persists_session_for_later_commands() {
        let access_token = format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(br#"{"sub":"7","exp":4102444800}"#)
        );
        let app = Router::new().route(
            "/api/auth/login",
            post(move || async move {
                Json(json!({
                    "accessToken": access_token,
                    "refreshToken": "refresh-1",
                    "full_name": "Ada Lovelace"
                }))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let token_file = dir.path().join("session.json");
        let base = format!("http://{addr}");
        let args = |command: &[&str]| {
            let mut argv = vec![
                "mocka",
                "--api-base",
                base.as_str(),
                "--token-file",
                token_file.to_str().expect("utf8 path"),
            ];
            argv.extend_from_slice(command);
            MockaCli::try_parse_from(argv).expect("parse")
        };

        let lines = run(args(&["login", "--username", "ada", "--password", "pw"]))
            .await
            .expect("login");
        assert_eq!(lines, vec!["Login successful. Welcome, Ada Lovelace."]);

        let lines = run(args(&["status"])).await.expect("status");
        assert_eq!(lines[0], format!("API: {base} (from --api-base)"));
        assert_eq!(lines[1], "Signed in as Ada Lovelace");

        run(args(&["logout"])).await.expect("logout");
        let store = Arc::new(
            TokenStore::open(FilePersistence::new(&token_file)).expect("reopen store"),
        );
        assert_eq!(store.access_token(), None);
        assert_eq!(store.full_name().as_deref(), Some("Ada Lovelace"));

        let lines = run(args(&["status"])).await.expect("status");
        assert_eq!(lines[1], "Not signed in");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn logout_skips_startup_refresh_of_expiring_token() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&refreshes);
        let app = Router::new().route(
            "/api/auth/refresh",
            post(move || {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"accessToken": "new-access", "refreshToken": "new-refresh"}))
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let token_file = dir.path().join("session.json");
        let expired = format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(br#"{"sub":"7","exp":1}"#)
        );
        TokenStore::open(FilePersistence::new(&token_file))
            .expect("open store")
            .set_tokens(
                Some(expired.as_str()),
                RefreshTokenUpdate::Replace(Some("refresh-1")),
            )
            .expect("seed tokens");

        let base = format!("http://{addr}");
        let cli = MockaCli::try_parse_from([
            "mocka",
            "--api-base",
            base.as_str(),
            "--token-file",
            token_file.to_str().expect("utf8 path"),
            "logout",
        ])
        .expect("parse");
        let lines = run(cli).await.expect("logout");
        assert_eq!(lines[0], "Signed out.");
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);

        let store = TokenStore::open(FilePersistence::new(&token_file)).expect("reopen store");
        assert_eq!(store.access_token(), None);
        assert_eq!(store.refresh_token(), None);

        let _ = shutdown_tx.send(());
    }
}

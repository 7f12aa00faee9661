use std::io::{self, Read};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;

use pastekeep::config::AppConfig;
use pastekeep::service::crypto::EncryptionKeys;
use pastekeep::service::models::{
    OwnedPastesQuery, PageRequest, PasteCreateInfo, PasteEditInfo, PastyCreateInfo, PastyEditInfo,
};
use pastekeep::service::{Actor, PasteService, ServiceError, TokenService};
use pastekeep::{create_stores, ExpiresIn, Scope};

/// Create and manage pastes in the configured store.
#[derive(Parser, Debug)]
#[command(author, version = env!("PASTEKEEP_VERSION"), about)]
struct Cli {
    /// Act as this user id. Anonymous when omitted.
    #[arg(long, global = true)]
    user: Option<String>,

    /// Scope granted to --user (repeatable). Defaults to every scope.
    #[arg(long = "scope", global = true)]
    scopes: Vec<Scope>,

    /// Bearer access token (`{id}-{secret}`). Takes precedence over --user.
    #[arg(long, global = true)]
    token: Option<String>,

    /// Encryption passphrase for encrypted pastes.
    #[arg(long, global = true)]
    key: Option<String>,

    /// Passphrase for one paste as `<id>=<passphrase>` (repeatable). --key wins.
    #[arg(long = "paste-key", global = true, value_parser = parse_paste_key)]
    paste_keys: Vec<(String, String)>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a paste with a single pasty.
    Create {
        /// Pasty content. When omitted, stdin is read instead.
        text: Option<String>,
        #[arg(long)]
        stdin: bool,
        #[arg(long, default_value = "")]
        title: String,
        /// Language name, alias or extension; `Autodetect` is accepted.
        #[arg(long)]
        language: Option<String>,
        /// One of never, 1h, 2h, 10h, 1d, 2d, 1w, 1m, 1y.
        #[arg(long, default_value = "never")]
        expires: ExpiresIn,
        #[arg(long)]
        private: bool,
        #[arg(long)]
        pinned: bool,
        /// Create without an owner even when --user is given.
        #[arg(long)]
        anonymous: bool,
        /// Seal the content with --key.
        #[arg(long)]
        encrypted: bool,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Print a paste.
    Show { id: String },
    /// Replace the content of the first pasty, keeping its id.
    Edit {
        id: String,
        text: Option<String>,
        #[arg(long)]
        stdin: bool,
        /// New paste title; the current one is kept when omitted.
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        language: Option<String>,
    },
    /// List edits, newest first.
    History { id: String },
    /// Show what an edit changed.
    Diff { id: String, history_id: String },
    Delete { id: String },
    Star { id: String },
    Pin { id: String },
    Private { id: String },
    /// Replace the tag set.
    Tags { id: String, tags: Vec<String> },
    Stats { id: String },
    /// List pastes owned by a user, newest first.
    List {
        owner: String,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        pinned: bool,
        #[arg(long, default_value_t = 0)]
        page: usize,
        /// Defaults to the configured page size.
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Distinct tags across a user's pastes.
    OwnerTags { owner: String },
    /// Mint a session token for a user.
    Login { user: String },
}

/// Services the commands run against.
struct App {
    pastes: PasteService,
    tokens: TokenService,
    page_size: usize,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
    #[error("failed to render output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Input(String),
}

fn parse_paste_key(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((id, key)) if !id.trim().is_empty() && !key.is_empty() => {
            Ok((id.trim().to_string(), key.to_string()))
        }
        _ => Err(format!("expected <id>=<passphrase>, got `{value}`")),
    }
}

fn actor_from(user: Option<String>, scopes: Vec<Scope>) -> Actor {
    match user {
        None => Actor::Anonymous,
        Some(user_id) if scopes.is_empty() => Actor::with_all_scopes(user_id),
        Some(user_id) => Actor::user(user_id, scopes),
    }
}

fn read_content(text: Option<String>, stdin: bool) -> Result<String, CliError> {
    let content = if stdin {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        text.unwrap_or_default()
    };
    if content.trim().is_empty() {
        return Err(CliError::Input("No input provided.".into()));
    }
    Ok(content)
}

fn render<T: Serialize>(value: &T) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(value)?)
}

async fn execute(cli: Cli, app: &App) -> Result<String, CliError> {
    let Cli {
        user,
        scopes,
        token,
        key,
        paste_keys,
        command,
    } = cli;
    let actor = match token {
        Some(token) => app.tokens.authenticate(Some(&token)).await?,
        None => actor_from(user, scopes),
    };
    let mut keys = EncryptionKeys::new(key);
    for (paste_id, passphrase) in paste_keys {
        keys.remember(paste_id, passphrase);
    }
    let service = &app.pastes;

    match command {
        Command::Create {
            text,
            stdin,
            title,
            language,
            expires,
            private,
            pinned,
            anonymous,
            encrypted,
            tags,
        } => {
            let content = read_content(text, stdin)?;
            let info = PasteCreateInfo {
                title,
                pasties: vec![PastyCreateInfo {
                    title: String::new(),
                    content,
                    language,
                }],
                expires_in: expires,
                anonymous,
                private,
                pinned,
                encrypted,
                tags,
            };
            let paste = service.create(info, &actor, keys.for_paste("")).await?;
            render(&paste)
        }
        Command::Show { id } => render(&service.get(&id, &actor, keys.for_paste(&id)).await?),
        Command::Edit {
            id,
            text,
            stdin,
            title,
            language,
        } => {
            let content = read_content(text, stdin)?;
            let passphrase = keys.for_paste(&id);
            let current = service.get(&id, &actor, passphrase).await?;

            let mut pasties: Vec<PastyEditInfo> = current
                .pasties
                .iter()
                .map(|p| PastyEditInfo {
                    id: Some(p.id.clone()),
                    title: p.title.clone(),
                    content: p.content.clone(),
                    language: Some(p.language.clone()),
                })
                .collect();
            match pasties.first_mut() {
                Some(first) => {
                    first.content = content;
                    if language.is_some() {
                        first.language = language;
                    }
                }
                None => pasties.push(PastyEditInfo {
                    content,
                    language,
                    ..Default::default()
                }),
            }

            let info = PasteEditInfo {
                title: title.unwrap_or(current.title),
                pasties,
            };
            render(&service.edit(&id, info, &actor, passphrase).await?)
        }
        Command::History { id } => render(
            &service
                .history_compact(&id, &actor, keys.for_paste(&id))
                .await?,
        ),
        Command::Diff { id, history_id } => render(
            &service
                .diff(&id, &history_id, &actor, keys.for_paste(&id))
                .await?,
        ),
        Command::Delete { id } => {
            service.delete(&id, &actor).await?;
            render(&serde_json::json!({ "deleted": id }))
        }
        Command::Star { id } => {
            let starred = service.toggle_star(&id, &actor).await?;
            render(&serde_json::json!({ "id": id, "starred": starred }))
        }
        Command::Pin { id } => {
            let pinned = service.toggle_pinned(&id, &actor).await?;
            render(&serde_json::json!({ "id": id, "pinned": pinned }))
        }
        Command::Private { id } => {
            let private = service.toggle_private(&id, &actor).await?;
            render(&serde_json::json!({ "id": id, "private": private }))
        }
        Command::Tags { id, tags } => {
            let tags = service.edit_tags(&id, &actor, &tags).await?;
            render(&serde_json::json!({ "id": id, "tags": tags }))
        }
        Command::Stats { id } => {
            let passphrase = keys.for_paste(&id);
            let stats = service.stats(&id, &actor, passphrase).await?;
            let languages = service.language_stats(&id, &actor, passphrase).await?;
            render(&serde_json::json!({ "stats": stats, "languages": languages }))
        }
        Command::List {
            owner,
            tag,
            pinned,
            page,
            page_size,
        } => {
            let query = OwnedPastesQuery {
                tag,
                pinned_only: pinned,
                page: PageRequest::new(page, page_size.unwrap_or(app.page_size)),
            };
            render(&service.owned_pastes(&owner, &actor, &query).await?)
        }
        Command::OwnerTags { owner } => render(&service.owner_tags(&owner, &actor).await?),
        Command::Login { user } => render(&app.tokens.issue_session(&user).await?),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_filter.as_str()),
    )
    .init();

    let stores = match create_stores(&config) {
        Ok(stores) => stores,
        Err(err) => {
            log::error!("failed to open store: {err}");
            return ExitCode::FAILURE;
        }
    };
    let app = App {
        pastes: PasteService::new(Arc::clone(&stores.pastes)),
        tokens: TokenService::new(Arc::clone(&stores.tokens)),
        page_size: config.page_size,
    };

    match execute(cli, &app).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(CliError::Service(err)) => {
            let response = err.to_response();
            match serde_json::to_string(&response) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("{}", response.message),
            }
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pastekeep::MemoryPasteStore;
    use serde_json::Value;

    fn service() -> App {
        let store = Arc::new(MemoryPasteStore::new());
        App {
            pastes: PasteService::new(store.clone()),
            tokens: TokenService::new(store),
            page_size: 2,
        }
    }

    async fn run(app: &App, args: &[&str]) -> Result<Value, CliError> {
        let mut argv = vec!["pastekeep"];
        argv.extend_from_slice(args);
        let output = execute(Cli::parse_from(argv), app).await?;
        Ok(serde_json::from_str(&output).expect("json output"))
    }

    #[tokio::test]
    async fn create_then_show() {
        let svc = service();
        let created = run(&svc, &["create", "Hello, World!"]).await.unwrap();
        assert_eq!(created["pasties"][0]["language"], "Text");

        let id = created["id"].as_str().unwrap();
        let shown = run(&svc, &["show", id]).await.unwrap();
        assert_eq!(shown["pasties"][0]["content"], "Hello, World!");
    }

    #[tokio::test]
    async fn anonymous_pin_is_rejected() {
        let svc = service();
        let err = run(&svc, &["create", "x", "--pinned"]).await.unwrap_err();
        match err {
            CliError::Service(err) => assert_eq!(err.status_code(), 401),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn edit_keeps_pasty_id_and_records_history() {
        let svc = service();
        let created = run(&svc, &["create", "first", "--user", "u1", "--title", "t"])
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();
        let pasty_id = created["pasties"][0]["id"].clone();

        let edited = run(&svc, &["edit", id, "second", "--user", "u1"])
            .await
            .unwrap();
        assert_eq!(edited["pasties"][0]["id"], pasty_id);
        assert_eq!(edited["title"], "t");

        let history = run(&svc, &["history", id, "--user", "u1"]).await.unwrap();
        assert_eq!(history.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn encrypted_round_trip_needs_key() {
        let svc = service();
        let created = run(&svc, &["create", "secret", "--encrypted", "--key", "epikepik"])
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();

        assert!(run(&svc, &["show", id]).await.is_err());
        let shown = run(&svc, &["show", id, "--key", "epikepik"]).await.unwrap();
        assert_eq!(shown["pasties"][0]["content"], "secret");
    }

    #[tokio::test]
    async fn scoped_user_without_paste_scope_cannot_delete() {
        let svc = service();
        let created = run(&svc, &["create", "x", "--user", "u1"]).await.unwrap();
        let id = created["id"].as_str().unwrap();

        let err = run(&svc, &["delete", id, "--user", "u1", "--scope", "paste:read"])
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Service(ServiceError::Forbidden(_))));

        let deleted = run(&svc, &["delete", id, "--user", "u1"]).await.unwrap();
        assert_eq!(deleted["deleted"], id);
    }

    #[tokio::test]
    async fn login_token_acts_as_the_user() {
        let svc = service();
        let login = run(&svc, &["login", "u1"]).await.unwrap();
        let token = login["accessToken"].as_str().unwrap().to_string();

        let created = run(&svc, &["create", "x", "--token", &token, "--private"])
            .await
            .unwrap();
        assert_eq!(created["ownerId"], "u1");

        let err = run(&svc, &["create", "x", "--token", "bogus-token", "--private"])
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Service(ServiceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn list_uses_configured_page_size() {
        let svc = service();
        for n in 0..3 {
            let content = format!("paste {n}");
            run(&svc, &["create", &content, "--user", "u1", "--tag", "rust"])
                .await
                .unwrap();
        }

        let page = run(&svc, &["list", "u1", "--user", "u1"]).await.unwrap();
        assert_eq!(page["items"].as_array().unwrap().len(), 2);
        assert_eq!(page["hasNextPage"], true);

        let tags = run(&svc, &["owner-tags", "u1", "--user", "u1"]).await.unwrap();
        assert_eq!(tags, serde_json::json!(["rust"]));
    }

    #[tokio::test]
    async fn per_paste_key_opens_only_its_paste() {
        let svc = service();
        let created = run(&svc, &["create", "secret", "--encrypted", "--key", "epikepik"])
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();

        let pair = format!("{id}=epikepik");
        let shown = run(&svc, &["show", id, "--paste-key", &pair]).await.unwrap();
        assert_eq!(shown["pasties"][0]["content"], "secret");

        let err = run(&svc, &["show", id, "--paste-key", "other=epikepik"])
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Service(ServiceError::BadRequest(_))));
    }

    #[test]
    fn paste_key_needs_id_and_passphrase() {
        assert_eq!(
            parse_paste_key("abc=p=q").unwrap(),
            ("abc".to_string(), "p=q".to_string())
        );
        assert!(parse_paste_key("abc").is_err());
        assert!(parse_paste_key("=secret").is_err());
        assert!(parse_paste_key("abc=").is_err());
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            read_content(Some("  ".into()), false),
            Err(CliError::Input(_))
        ));
    }
}

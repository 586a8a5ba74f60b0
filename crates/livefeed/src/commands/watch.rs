//! `livefeed watch`: subscribe to entity streams and print them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use secrecy::SecretString;
use tokio::sync::watch;
use tokio::task::JoinSet;

use livefeed_config::{self as config, Config};
use livefeed_core::{
    ConnectionStatus, DEFAULT_EVENT, ErrorKind, FeedConfig, FeedHub, Handlers, StaticToken,
    TlsMode,
};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;
use crate::output::Printer;

/// Where to connect and with which token, after flags and profile merge.
struct Target {
    profile: String,
    feed: FeedConfig,
    token: SecretString,
}

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load_config()?;
    let mut target = resolve_target(&cfg, global)?;
    if let Some(max) = args.max_retries {
        target.feed.reconnect.max_retries = Some(max);
    }

    let printer = Printer::new(global.color, args.json);
    let hub = FeedHub::http(target.feed, Arc::new(StaticToken::from(target.token)))?;
    let rejected = Arc::new(AtomicBool::new(false));

    let mut keys = args.keys;
    keys.sort();
    keys.dedup();

    let events = if args.events.is_empty() {
        vec![DEFAULT_EVENT.to_owned()]
    } else {
        args.events
    };

    let mut watchers = JoinSet::new();
    for key in &keys {
        hub.connect(key, handlers_for(key, &events, printer, &rejected))?;
        if let Some(rx) = hub.status(key) {
            watchers.spawn(follow_status(key.clone(), rx, printer));
        }
    }
    tracing::info!(keys = ?keys, profile = %target.profile, "watching");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, closing streams");
            hub.shutdown();
            Ok(())
        }
        () = wait_all(&mut watchers) => {
            if rejected.load(Ordering::Relaxed) {
                Err(CliError::AuthFailed { profile: target.profile })
            } else {
                Err(CliError::StreamsClosed { keys: keys.join(", ") })
            }
        }
    }
}

fn handlers_for(
    key: &str,
    events: &[String],
    printer: Printer,
    rejected: &Arc<AtomicBool>,
) -> Handlers {
    let mut handlers = Handlers::new();
    for event in events {
        let (key, name) = (key.to_owned(), event.clone());
        handlers = handlers.on(event.as_str(), move |data| printer.event(&key, &name, data));
    }

    let rejected = Arc::clone(rejected);
    handlers.on_error(move |err| {
        if err.kind == ErrorKind::AuthRejected {
            rejected.store(true, Ordering::Relaxed);
        }
        printer.fault(err);
    })
}

/// Print status transitions until the connection closes.
async fn follow_status(key: String, mut rx: watch::Receiver<ConnectionStatus>, printer: Printer) {
    loop {
        let status = *rx.borrow_and_update();
        printer.status(&key, status);
        if status == ConnectionStatus::Closed || rx.changed().await.is_err() {
            return;
        }
    }
}

async fn wait_all(watchers: &mut JoinSet<()>) {
    while watchers.join_next().await.is_some() {}
}

// ── Target resolution ───────────────────────────────────────────────

/// Merge the active profile (if any) with `--server`, `--token` and
/// `--insecure`.
fn resolve_target(cfg: &Config, global: &GlobalOpts) -> Result<Target, CliError> {
    let profile_name = cfg.active_profile_name(global.profile.as_deref());
    let flag_token = global.token.clone().map(SecretString::from);

    let (mut feed, token) = if let Some(profile) = cfg.profiles.get(&profile_name) {
        let mut feed = config::profile_to_feed_config(profile, &cfg.defaults)?;
        if let Some(ref server) = global.server {
            feed.base_url = parse_server(server)?;
        }
        let token = match flag_token {
            Some(token) => token,
            None => config::resolve_token(profile, &profile_name)?,
        };
        (feed, token)
    } else {
        // A profile named explicitly must exist; the implicit default may not.
        if global.profile.is_some() {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: available_profiles(cfg),
            });
        }
        let server = global.server.as_deref().ok_or_else(|| CliError::NoConfig {
            path: config::config_path().display().to_string(),
        })?;
        let feed = FeedConfig::new(parse_server(server)?);
        let token = flag_token.ok_or_else(|| CliError::NoCredentials {
            profile: profile_name.clone(),
        })?;
        (feed, token)
    };

    if global.insecure {
        feed.transport.tls = TlsMode::DangerAcceptInvalid;
    }

    Ok(Target {
        profile: profile_name,
        feed,
        token,
    })
}

fn parse_server(server: &str) -> Result<url::Url, CliError> {
    server.parse().map_err(|e| CliError::Validation {
        field: "server".into(),
        reason: format!("invalid URL '{server}': {e}"),
    })
}

fn available_profiles(cfg: &Config) -> String {
    if cfg.profiles.is_empty() {
        "(none)".into()
    } else {
        cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

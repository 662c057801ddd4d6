use futures::future::join_all;
use rmuse::logger::{self, LogLevel, LoggerConfig};
use rmuse::{CancellationToken, MuseClient, MuseConfig, PollOutcome, PollerConfig, ProgressUpdate};
use std::env;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let env_loaded = dotenv::dotenv().is_ok();

    let level = env::var("RMUSE_LOG")
        .ok()
        .and_then(|name| LogLevel::parse(&name))
        .unwrap_or(LogLevel::Info);
    if let Err(e) = logger::init_with_config(LoggerConfig::development().with_level(level)) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    if env_loaded {
        log::info!("✅ .env file loaded");
    } else {
        log::warn!("⚠️  No .env file found, using system environment variables");
    }

    let prompts: Vec<String> = env::args().skip(1).collect();
    if prompts.is_empty() {
        eprintln!("usage: rmuse <prompt> [<prompt> ...]");
        return ExitCode::FAILURE;
    }

    let config = MuseConfig::from_env();
    let poller_config = PollerConfig::from_env();
    logger::log_config_info(&config, &poller_config);

    let client = match MuseClient::new(config, poller_config) {
        Ok(client) => client,
        Err(e) => {
            log::error!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("⚠️  Interrupted, cancelling running jobs");
            ctrl_c.cancel();
        }
    });

    let runs = prompts.iter().enumerate().map(|(index, prompt)| {
        let client = client.clone();
        let cancel = cancel.clone();
        async move {
            let request = match client.request(prompt.as_str()) {
                Ok(request) => request,
                Err(e) => return PollOutcome::Failure(e),
            };
            let report = move |update: &ProgressUpdate| {
                log::info!(
                    "⏳ [{}] tick {} {:>3}% {}",
                    index + 1,
                    update.tick,
                    update.percent,
                    update.detail
                );
            };
            client
                .submit_and_track(&request, Some(&report), Some(&cancel))
                .await
        }
    });

    let outcomes = join_all(runs).await;

    let mut all_succeeded = true;
    for (prompt, outcome) in prompts.iter().zip(&outcomes) {
        match outcome {
            PollOutcome::Success(artifacts) => {
                log::info!("🎨 '{}' produced {} image(s)", prompt, artifacts.len());
                for artifact in artifacts {
                    println!("{}", artifact.url);
                }
            }
            other => {
                all_succeeded = false;
                log::error!(
                    "❌ '{}': {}",
                    prompt,
                    other.reason().unwrap_or_default()
                );
            }
        }
    }

    if all_succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

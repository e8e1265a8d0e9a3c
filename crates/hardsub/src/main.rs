use std::process::ExitCode;

use log::{error, info, warn};

use hardsub::backend::{self, ExecutionPlan};
use hardsub::cancel::CancelHandle;
use hardsub::cli::parse_cli;
use hardsub::settings::resolve_settings;
use hardsub_decoder::Configuration;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,hardsub=info"),
    )
    .init();

    let (cli, sources) = parse_cli();
    if cli.list_backends {
        backend::display_available_backends();
        return ExitCode::SUCCESS;
    }

    let settings = match resolve_settings(&cli, &sources) {
        Ok(settings) => settings,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let Some(input) = settings.input.clone() else {
        error!("no input video given; see --help");
        return ExitCode::FAILURE;
    };

    let env_backend_present = std::env::var("HARDSUB_BACKEND").is_ok();
    let mut config = match Configuration::from_env() {
        Ok(config) => config,
        Err(err) => {
            warn!("ignoring decoder environment: {err}");
            Configuration::default()
        }
    };
    let mut backend_locked = env_backend_present;
    if let Some(name) = settings.backend.as_deref() {
        match backend::parse_backend(name) {
            Ok(backend) => {
                config.backend = backend;
                backend_locked = true;
            }
            Err(err) => {
                error!("{err}");
                return ExitCode::FAILURE;
            }
        }
    }
    config.input = Some(input);
    if let Some(capacity) = settings.decoder_channel_capacity {
        config.channel_capacity = std::num::NonZeroUsize::new(capacity);
    }

    let cancel = CancelHandle::new();
    let signal_handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing with the frames sampled so far");
            signal_handle.cancel();
        }
    });

    let plan = ExecutionPlan {
        config,
        backend_locked,
        pipeline: settings.pipeline,
    };
    match backend::run(plan, &cancel).await {
        Ok(summary) => {
            info!(
                "subtitle output written to {} ({} cues)",
                summary.output.display(),
                summary.cues
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

use std::{process::ExitCode, time::Duration};

use bytes::Bytes;
use page_proxy::{
    application::{AppError, RequestContext, ResolutionEngine},
    config::{self, CacheArgs, Command, IdArgs, ResolveArgs},
    infra::{error::InfraError, telemetry},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{Dispatch, Level, debug, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use url::Url;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            report_application_error(&error);
            ExitCode::from(error.exit_code())
        }
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %report.chain(), source = report.source, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %report.chain(), source = report.source, "application error");
    });
}

async fn run() -> Result<ExitCode, AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;
    let engine = ResolutionEngine::from_settings(&settings)?;
    debug!(
        ttl = %engine.ttl(),
        verbose = engine.is_verbose(),
        backend = ?settings.store.backend,
        "resolution engine ready"
    );

    match cli_args.command {
        Command::Resolve(args) => run_resolve(&engine, args).await,
        Command::Cache(args) => run_cache(&engine, args).await,
        Command::Read(args) => run_read(&engine, args).await,
        Command::Has(args) => run_has(&engine, args).await,
        Command::Forget(args) => run_forget(&engine, args).await,
    }
}

async fn run_resolve(engine: &ResolutionEngine, args: ResolveArgs) -> Result<ExitCode, AppError> {
    let id = args.id.identifier()?;
    Url::parse(&args.url)
        .map_err(|err| AppError::validation(format!("invalid url `{}`: {err}", args.url)))?;

    let (ctx, cancel) = RequestContext::cancellable();
    let ctx = match args.timeout_ms {
        Some(millis) => ctx.child_with_timeout(Duration::from_millis(millis)),
        None => ctx,
    };

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling origin request");
            cancel.cancel();
        }
    });

    let result = engine.resolve(&ctx, &args.url, &id).await;
    interrupt.abort();

    write_stdout(&result?).await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_cache(engine: &ResolutionEngine, args: CacheArgs) -> Result<ExitCode, AppError> {
    let id = args.id.identifier()?;
    let content = match args.file.as_ref() {
        Some(path) => tokio::fs::read(path).await.map_err(InfraError::from)?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .map_err(InfraError::from)?;
            buf
        }
    };

    let len = content.len();
    engine.cache(Bytes::from(content), &id).await?;
    info!(id = %id, bytes = len, ttl = %engine.ttl(), "page cached");
    Ok(ExitCode::SUCCESS)
}

async fn run_read(engine: &ResolutionEngine, args: IdArgs) -> Result<ExitCode, AppError> {
    let id = args.identifier()?;
    let content = engine.read_from_cache(&id).await?;
    write_stdout(&content).await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_has(engine: &ResolutionEngine, args: IdArgs) -> Result<ExitCode, AppError> {
    let id = args.identifier()?;
    let present = engine.has_in_cache(&id).await;
    write_stdout(format!("{present}\n").as_bytes()).await?;
    Ok(if present {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_forget(engine: &ResolutionEngine, args: IdArgs) -> Result<ExitCode, AppError> {
    let id = args.identifier()?;
    engine.forget(&id).await;
    info!(id = %id, "page forgotten");
    Ok(ExitCode::SUCCESS)
}

async fn write_stdout(content: &[u8]) -> Result<(), AppError> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(content).await.map_err(InfraError::from)?;
    stdout.flush().await.map_err(InfraError::from)?;
    Ok(())
}

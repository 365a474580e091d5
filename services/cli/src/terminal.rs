//! Interactive single run: progress on stdout, a y/N prompt at the upload gate, Ctrl-C cancels.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::infra::PipelineFactory;
use cv_tagger::config::AppConfig;
use cv_tagger::error::AppError;
use cv_tagger::telemetry;
use cv_tagger::workflows::cv_pipeline::{
    ChannelObserver, PipelineEvent, PipelineState, ProgressObserver, RunControl, RunHandle,
    TOTAL_STAGES,
};

pub(crate) async fn run(args: RunArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let factory = PipelineFactory::from_config(&config)?;
    let (channel, mut events) = ChannelObserver::channel();
    let observer: Arc<dyn ProgressObserver> = Arc::new(channel);
    let handle = RunHandle::spawn(Arc::new(factory.build(&args.request(), observer)));
    let control = handle.control().clone();

    let interrupt = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            interrupt.cancel_upload();
        }
    });

    while let Some(event) = events.recv().await {
        if let Some(line) = render(&event) {
            println!("{line}");
        }
        if let PipelineEvent::StateChanged(progress) = &event {
            if progress.state == PipelineState::AwaitingConfirmation {
                decide_upload(&control, args.yes).await?;
            }
        }
    }

    let run = handle.wait().await?;
    info!(
        state = run.state.label(),
        failures = run.total_failures(),
        "run finished"
    );
    match run.state {
        PipelineState::Failed => Err(AppError::Run(run.message)),
        _ => Ok(()),
    }
}

async fn decide_upload(control: &RunControl, auto_approve: bool) -> Result<(), AppError> {
    if auto_approve {
        record_decision(control, control.approve(), "approval");
        return Ok(());
    }

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(b"Proceed with upload? [y/N] ")
        .await?;
    stdout.flush().await?;

    let mut answer = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        read = stdin.read_line(&mut answer) => {
            read?;
        }
        _ = control.token.requested() => return Ok(()),
    }

    if is_affirmative(&answer) {
        record_decision(control, control.approve(), "approval");
    } else {
        record_decision(control, control.reject(), "rejection");
    }
    Ok(())
}

fn record_decision(control: &RunControl, accepted: bool, decision: &str) {
    if accepted {
        info!(decision, "upload decision recorded");
    } else {
        warn!(
            decision,
            gate = ?control.gate.state(),
            "upload decision ignored; the run is no longer waiting for one"
        );
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn render(event: &PipelineEvent) -> Option<String> {
    match event {
        PipelineEvent::StateChanged(progress) if progress.stage_ordinal > 0 => Some(format!(
            "[{}/{}] {}: {}",
            progress.stage_ordinal, TOTAL_STAGES, progress.stage_name, progress.message
        )),
        PipelineEvent::StateChanged(_) => None,
        PipelineEvent::Item {
            item,
            succeeded,
            message,
            ..
        } => {
            let marker = if *succeeded { "ok" } else { "!!" };
            Some(format!("    {marker} {item}: {message}"))
        }
        PipelineEvent::ReportReady { path, rows } => {
            Some(format!("Report with {rows} rows written to {}", path.display()))
        }
        PipelineEvent::Finished(completion) => Some(format!(
            "{}: {}",
            completion.state.label(),
            completion.message
        )),
    }
}

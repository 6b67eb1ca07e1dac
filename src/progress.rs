//! Progress reporting channel (spec.md §9's replacement for ad-hoc stdout
//! prints): ingestion stages publish `ProgressEvent`s, the CLI renderer
//! subscribes and draws whatever it wants from them.

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Query,
    BatchFetch,
    History,
    Normalize,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Query => "query",
            Phase::BatchFetch => "batch_fetch",
            Phase::History => "history",
            Phase::Normalize => "normalize",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Phase(Phase),
    Progress {
        phase: Phase,
        done: usize,
        total: usize,
        items: usize,
    },
    Done,
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Send, swallowing the error when nobody is listening anymore — progress
/// reporting is best-effort and must never fail an ingestion run.
pub fn emit(sender: Option<&ProgressSender>, event: ProgressEvent) {
    if let Some(sender) = sender {
        let _ = sender.send(event);
    }
}

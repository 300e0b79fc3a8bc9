use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::types::{AutomationError, ControlLocator, ElementId, RemoteSession};
use crate::lib::{
    orchestrator::types::PipelineError,
    readiness::{
        poll::Poller,
        types::{PollError, PollPolicy},
    },
    tasks::{engine::TaskEngine, types::TaskHandle},
};

/// Inputs of one pass through the converter's page.
#[derive(Debug, Clone)]
pub struct ConversionPlan {
    pub url: String,
    /// `name` attribute of the "load settings from" file input.
    pub input_name: String,
    /// The configuration document as the browser's task sees it.
    pub document: String,
    /// Where the browser saves downloads inside the UI task.
    pub download_dir: String,
    pub ui_wait: PollPolicy,
}

#[derive(Debug, Clone, Copy)]
enum Condition {
    Visible,
    Clickable,
}

impl Condition {
    fn label(self) -> &'static str {
        match self {
            Condition::Visible => "visible",
            Condition::Clickable => "clickable",
        }
    }

    async fn holds(
        self,
        session: &dyn RemoteSession,
        element: ElementId,
    ) -> Result<bool, AutomationError> {
        let displayed = session.is_displayed(element).await?;
        match self {
            Condition::Visible => Ok(displayed),
            Condition::Clickable => Ok(displayed && session.is_enabled(element).await?),
        }
    }
}

/// Loads the document into the converter and presses its convert control.
/// The download itself is collected by the artifact extractor.
pub async fn drive_conversion(
    session: &dyn RemoteSession,
    locator: &dyn ControlLocator,
    engine: &dyn TaskEngine,
    ui_task: &TaskHandle,
    plan: &ConversionPlan,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    debug!(url = %plan.url, "navigate");
    session.navigate(&plan.url).await?;

    debug!(document = %plan.document, "supply input");
    let input = session.find_by_name(&plan.input_name).await?;
    session.send_keys(input, &plan.document).await?;

    debug!("locate convert control");
    let control = locator.locate(session).await?;

    // Stale downloads from an earlier run would be mistaken for ours
    let clear = format!("rm -f {}/* 2>/dev/null; true", plan.download_dir);
    engine.exec(ui_task, &clear).await?;

    // The control is not interactable right after scrolling
    session.scroll_into_view(control).await?;
    wait_for(session, control, Condition::Visible, plan.ui_wait, cancel).await?;
    wait_for(session, control, Condition::Clickable, plan.ui_wait, cancel).await?;

    session.click(control).await?;
    info!("Conversion triggered");
    Ok(())
}

async fn wait_for(
    session: &dyn RemoteSession,
    element: ElementId,
    condition: Condition,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    let what = "convert control";
    let mut poller = Poller::new(format!("{} to become {}", what, condition.label()), policy, cancel);

    loop {
        if condition.holds(session, element).await? {
            return Ok(());
        }
        match poller.tick().await {
            Ok(()) => {}
            Err(PollError::TimedOut { waited, .. }) => {
                return Err(AutomationError::NotInteractable {
                    what: what.to_string(),
                    condition: condition.label(),
                    waited,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

use std::time::Duration;

use async_trait::async_trait;

/// Opaque reference to an element found during one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub usize);

#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("could not open a webdriver session: {0}")]
    Session(String),

    #[error("element not found: {0}")]
    ElementMissing(String),

    #[error("#{region} has {found} <{tag}> elements, expected one at position {ordinal}")]
    OrdinalOutOfRange {
        region: String,
        tag: String,
        ordinal: usize,
        found: usize,
    },

    #[error("{what} did not become {condition} within {waited:?}")]
    NotInteractable {
        what: String,
        condition: &'static str,
        waited: Duration,
    },

    #[error("webdriver command failed: {0}")]
    Command(String),

    #[error("unknown element handle {0:?}")]
    UnknownElement(ElementId),
}

/// A live remote browser session.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), AutomationError>;

    async fn find_by_name(&self, name: &str) -> Result<ElementId, AutomationError>;

    async fn find_by_id(&self, id: &str) -> Result<ElementId, AutomationError>;

    /// Direct children of `parent` with the given tag, in document order.
    async fn find_children_by_tag(
        &self,
        parent: ElementId,
        tag: &str,
    ) -> Result<Vec<ElementId>, AutomationError>;

    async fn find_by_tag(&self, parent: ElementId, tag: &str) -> Result<ElementId, AutomationError>;

    async fn send_keys(&self, element: ElementId, text: &str) -> Result<(), AutomationError>;

    async fn scroll_into_view(&self, element: ElementId) -> Result<(), AutomationError>;

    async fn is_displayed(&self, element: ElementId) -> Result<bool, AutomationError>;

    async fn is_enabled(&self, element: ElementId) -> Result<bool, AutomationError>;

    async fn click(&self, element: ElementId) -> Result<(), AutomationError>;

    async fn close(&self) -> Result<(), AutomationError>;
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, AutomationError>;
}

/// Finds the control that starts the conversion.
#[async_trait]
pub trait ControlLocator: Send + Sync {
    async fn locate(&self, session: &dyn RemoteSession) -> Result<ElementId, AutomationError>;
}

/// Walks `#region_id`, takes its `group_tag` child at `ordinal`, then the
/// `control_tag` inside it. The ordinal is tied to the converter's page
/// layout and must be rechecked whenever the tool is upgraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrdinalControlLocator {
    pub region_id: String,
    pub group_tag: String,
    pub ordinal: usize,
    pub control_tag: String,
}

impl Default for OrdinalControlLocator {
    fn default() -> Self {
        OrdinalControlLocator {
            region_id: "export".to_string(),
            group_tag: "div".to_string(),
            ordinal: 9,
            control_tag: "button".to_string(),
        }
    }
}

#[async_trait]
impl ControlLocator for OrdinalControlLocator {
    async fn locate(&self, session: &dyn RemoteSession) -> Result<ElementId, AutomationError> {
        let region = session.find_by_id(&self.region_id).await?;
        let groups = session.find_children_by_tag(region, &self.group_tag).await?;
        let group = groups
            .get(self.ordinal)
            .copied()
            .ok_or_else(|| AutomationError::OrdinalOutOfRange {
                region: self.region_id.clone(),
                tag: self.group_tag.clone(),
                ordinal: self.ordinal,
                found: groups.len(),
            })?;
        session.find_by_tag(group, &self.control_tag).await
    }
}

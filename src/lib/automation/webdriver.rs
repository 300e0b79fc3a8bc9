use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use fantoccini::{
    Client, ClientBuilder, Locator, elements::Element, error::CmdError, wd::TimeoutConfiguration,
};
use tracing::{debug, info};

use super::types::{AutomationError, ElementId, RemoteSession, SessionConnector};

/// Opens sessions against a WebDriver endpoint such as a selenium standalone server.
#[derive(Debug, Clone)]
pub struct WebDriverConnector {
    pub endpoint: String,
    pub browser: String,
    pub implicit_wait: Duration,
}

impl WebDriverConnector {
    /// Only the implicit element wait is set; script and page-load keep the server's defaults.
    fn timeouts(&self) -> TimeoutConfiguration {
        TimeoutConfiguration::new(None, None, Some(self.implicit_wait))
    }
}

#[async_trait]
impl SessionConnector for WebDriverConnector {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, AutomationError> {
        let mut capabilities = serde_json::Map::new();
        capabilities.insert(
            "browserName".to_string(),
            serde_json::Value::String(self.browser.clone()),
        );

        let mut builder = ClientBuilder::native();
        builder.capabilities(capabilities);
        let client = builder
            .connect(&self.endpoint)
            .await
            .map_err(|e| AutomationError::Session(e.to_string()))?;

        client
            .update_timeouts(self.timeouts())
            .await
            .map_err(|e| AutomationError::Session(e.to_string()))?;

        info!(endpoint = %self.endpoint, browser = %self.browser, "WebDriver session opened");
        Ok(Box::new(WebDriverSession {
            client,
            elements: Mutex::new(Vec::new()),
        }))
    }
}

pub struct WebDriverSession {
    client: Client,
    elements: Mutex<Vec<Element>>,
}

impl WebDriverSession {
    fn remember(&self, element: Element) -> ElementId {
        let mut elements = match self.elements.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        elements.push(element);
        ElementId(elements.len() - 1)
    }

    fn element(&self, id: ElementId) -> Result<Element, AutomationError> {
        let elements = match self.elements.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        elements
            .get(id.0)
            .cloned()
            .ok_or(AutomationError::UnknownElement(id))
    }
}

fn command_error(what: &str, e: CmdError) -> AutomationError {
    if e.is_no_such_element() {
        AutomationError::ElementMissing(what.to_string())
    } else {
        AutomationError::Command(format!("{}: {}", what, e))
    }
}

#[async_trait]
impl RemoteSession for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), AutomationError> {
        debug!(url, "navigating");
        self.client
            .goto(url)
            .await
            .map_err(|e| command_error(url, e))
    }

    async fn find_by_name(&self, name: &str) -> Result<ElementId, AutomationError> {
        let what = format!("[name={:?}]", name);
        let element = self
            .client
            .find(Locator::Css(&what))
            .await
            .map_err(|e| command_error(&what, e))?;
        Ok(self.remember(element))
    }

    async fn find_by_id(&self, id: &str) -> Result<ElementId, AutomationError> {
        let element = self
            .client
            .find(Locator::Id(id))
            .await
            .map_err(|e| command_error(&format!("#{}", id), e))?;
        Ok(self.remember(element))
    }

    async fn find_children_by_tag(
        &self,
        parent: ElementId,
        tag: &str,
    ) -> Result<Vec<ElementId>, AutomationError> {
        let selector = format!(":scope > {}", tag);
        let found = self
            .element(parent)?
            .find_all(Locator::Css(&selector))
            .await
            .map_err(|e| command_error(&selector, e))?;
        Ok(found.into_iter().map(|element| self.remember(element)).collect())
    }

    async fn find_by_tag(&self, parent: ElementId, tag: &str) -> Result<ElementId, AutomationError> {
        let element = self
            .element(parent)?
            .find(Locator::Css(tag))
            .await
            .map_err(|e| command_error(tag, e))?;
        Ok(self.remember(element))
    }

    async fn send_keys(&self, element: ElementId, text: &str) -> Result<(), AutomationError> {
        self.element(element)?
            .send_keys(text)
            .await
            .map_err(|e| command_error("send keys", e))
    }

    async fn scroll_into_view(&self, element: ElementId) -> Result<(), AutomationError> {
        let target = serde_json::to_value(self.element(element)?)
            .map_err(|e| AutomationError::Command(e.to_string()))?;
        self.client
            .execute("arguments[0].scrollIntoView(true);", vec![target])
            .await
            .map(|_| ())
            .map_err(|e| command_error("scroll into view", e))
    }

    async fn is_displayed(&self, element: ElementId) -> Result<bool, AutomationError> {
        self.element(element)?
            .is_displayed()
            .await
            .map_err(|e| command_error("is displayed", e))
    }

    async fn is_enabled(&self, element: ElementId) -> Result<bool, AutomationError> {
        self.element(element)?
            .is_enabled()
            .await
            .map_err(|e| command_error("is enabled", e))
    }

    async fn click(&self, element: ElementId) -> Result<(), AutomationError> {
        self.element(element)?
            .click()
            .await
            .map_err(|e| command_error("click", e))
    }

    async fn close(&self) -> Result<(), AutomationError> {
        self.client
            .clone()
            .close()
            .await
            .map_err(|e| command_error("close session", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_implicit_wait_is_configured() {
        let connector = WebDriverConnector {
            endpoint: "http://localhost:4444".to_string(),
            browser: "firefox".to_string(),
            implicit_wait: Duration::from_secs(10),
        };

        let timeouts = connector.timeouts();

        assert_eq!(timeouts.implicit(), Some(Duration::from_secs(10)));
        assert_eq!(timeouts.script(), None);
        assert_eq!(timeouts.page_load(), None);
    }
}

//! Default-browser invocation (§10.5).

use async_trait::async_trait;

use crate::error::Error;

#[async_trait]
pub trait BrowserOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<(), Error>;
}

pub struct SystemBrowserOpener;

#[async_trait]
impl BrowserOpener for SystemBrowserOpener {
    async fn open(&self, url: &str) -> Result<(), Error> {
        let url = url.to_string();
        tokio::task::spawn_blocking(move || open::that(url))
            .await
            .map_err(|e| Error::BrowserOpen(e.to_string()))?
            .map_err(|e| Error::BrowserOpen(e.to_string()))
    }
}

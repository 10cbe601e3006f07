use anyhow::{Context, Result};
use arboard::Clipboard;
use tracing::debug;

pub struct ClipboardChannel {
    clipboard: Clipboard,
}

impl ClipboardChannel {
    pub fn open() -> Result<Self> {
        let clipboard = Clipboard::new().context("failed to open system clipboard")?;
        Ok(Self { clipboard })
    }

    pub fn read(&mut self) -> Result<Option<String>> {
        match self.clipboard.get_text() {
            Ok(text) if text.is_empty() => Ok(None),
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(err) => Err(err).context("failed to read clipboard text"),
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        if let Err(err) = self.clipboard.clear() {
            // Some clipboard managers refuse a clear; an empty string is equivalent here.
            debug!("clipboard clear failed ({err}); overwriting with empty text");
            self.clipboard
                .set_text(String::new())
                .context("failed to reset clipboard")?;
        }
        Ok(())
    }
}

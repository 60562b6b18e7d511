//! Player-facing status messages.

use bevy::log::{info, warn};

/// One transient status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub is_error: bool,
    /// Step during which the message was posted.
    pub step: u64,
}

/// Drainable log of status messages.
#[derive(Debug, Clone, Default)]
pub struct StatusLog {
    messages: Vec<StatusMessage>,
}

impl StatusLog {
    pub fn info(&mut self, step: u64, text: impl Into<String>) {
        let text = text.into();
        info!("Status: {text}");
        self.messages.push(StatusMessage {
            text,
            is_error: false,
            step,
        });
    }

    pub fn error(&mut self, step: u64, text: impl Into<String>) {
        let text = text.into();
        warn!("Status error: {text}");
        self.messages.push(StatusMessage {
            text,
            is_error: true,
            step,
        });
    }

    pub fn messages(&self) -> &[StatusMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&StatusMessage> {
        self.messages.last()
    }

    pub fn drain(&mut self) -> Vec<StatusMessage> {
        std::mem::take(&mut self.messages)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_drains() {
        let mut log = StatusLog::default();
        log.info(1, "Linked");
        log.error(2, "Cannot link");
        assert_eq!(log.messages().len(), 2);
        assert!(log.last().unwrap().is_error);
        let drained = log.drain();
        assert_eq!(drained[0].text, "Linked");
        assert_eq!(drained[1].step, 2);
        assert!(log.is_empty());
    }
}
